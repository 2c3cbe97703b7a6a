//! In-memory collection and passage store, useful for testing and demos.

use async_trait::async_trait;
use ragstream_core::error::RetrievalError;
use ragstream_core::retrieval::{
    MetadataFilter, Passage, PassageId, PassageStore, RankedHit, VectorCollection,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

fn matches_filter(
    metadata: &serde_json::Map<String, serde_json::Value>,
    filter: Option<&MetadataFilter>,
) -> bool {
    filter.is_none_or(|f| f.iter().all(|(k, v)| metadata.get(k) == Some(v)))
}

struct IndexedVector {
    id: PassageId,
    vector: Vec<f32>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

/// Exact nearest-neighbour search over vectors held in a `Vec`.
pub struct InMemoryCollection {
    name: String,
    entries: RwLock<Vec<IndexedVector>>,
}

impl InMemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn insert(
        &self,
        id: impl Into<PassageId>,
        vector: Vec<f32>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        self.entries.write().await.push(IndexedVector {
            id: id.into(),
            vector,
            metadata,
        });
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RankedHit>, RetrievalError> {
        let entries = self.entries.read().await;

        let mut scored: Vec<(f32, &PassageId)> = entries
            .iter()
            .filter(|e| matches_filter(&e.metadata, filter))
            .map(|e| (cosine_similarity(&e.vector, vector), &e.id))
            .collect();

        // Stable sort: equal similarity keeps insertion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        Ok(RankedHit::from_ordered(
            scored.into_iter().map(|(_, id)| id.clone()),
        ))
    }
}

/// A map-backed passage store.
#[derive(Default)]
pub struct InMemoryPassageStore {
    passages: RwLock<HashMap<PassageId, Passage>>,
}

impl InMemoryPassageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a passage.
    pub async fn upsert(&self, passage: Passage) {
        self.passages
            .write()
            .await
            .insert(passage.id.clone(), passage);
    }
}

#[async_trait]
impl PassageStore for InMemoryPassageStore {
    async fn fetch_by_ids(&self, ids: &[PassageId]) -> Result<Vec<Passage>, RetrievalError> {
        let passages = self.passages.read().await;
        Ok(ids.iter().filter_map(|id| passages.get(id).cloned()).collect())
    }
}
