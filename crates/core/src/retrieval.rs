//! Retrieval collaborator contracts.
//!
//! The fusion retriever talks to three kinds of collaborators: an
//! [`Embedder`] that turns text into vectors, one [`VectorCollection`] per
//! configured index, and a [`PassageStore`] that holds the authoritative text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// Opaque passage reference owned by the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(pub String);

impl PassageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PassageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PassageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PassageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One entry of a per-collection ranked list. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedHit {
    pub id: PassageId,
    pub rank: usize,
}

impl RankedHit {
    /// Number a list of ids by position, starting at rank 1.
    pub fn from_ordered(ids: impl IntoIterator<Item = PassageId>) -> Vec<Self> {
        ids.into_iter()
            .enumerate()
            .map(|(i, id)| Self { id, rank: i + 1 })
            .collect()
    }
}

/// A hydrated passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Equality filter on passage metadata, passed through to collections.
pub type MetadataFilter = serde_json::Map<String, serde_json::Value>;

/// Which side of an asymmetric embedding model a text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingTask {
    Query,
    Passage,
}

/// Embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input, in input order.
    async fn embed(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> std::result::Result<Vec<Vec<f32>>, RetrievalError>;
}

/// One semantic-search index.
///
/// Several collections are searched concurrently for the same query; an
/// error from one is treated by the caller as an empty list.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Collection name, used in logs.
    fn name(&self) -> &str;

    /// Nearest neighbours of `vector`, best first, at most `k` hits.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> std::result::Result<Vec<RankedHit>, RetrievalError>;
}

/// Durable text store.
#[async_trait]
pub trait PassageStore: Send + Sync {
    /// Fetch passages by id in one batch. Missing ids are simply absent from
    /// the result and order is unspecified.
    async fn fetch_by_ids(
        &self,
        ids: &[PassageId],
    ) -> std::result::Result<Vec<Passage>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_start_at_one() {
        let hits = RankedHit::from_ordered(["a", "b", "c"].map(PassageId::from));
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[2].rank, 3);
        assert_eq!(hits[2].id.as_str(), "c");
    }

    #[test]
    fn passage_id_is_transparent_in_json() {
        let json = serde_json::to_string(&PassageId::new("p-1")).unwrap();
        assert_eq!(json, r#""p-1""#);
    }
}
