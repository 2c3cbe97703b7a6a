//! Chroma-compatible HTTP vector collection.
//!
//! Collections store one vector per chunk; the passage a chunk belongs to is
//! read from a metadata key (`passage_id` by default). Ranks are the 1-based
//! positions in Chroma's neighbour list, so a skipped chunk leaves a gap.

use async_trait::async_trait;
use ragstream_core::error::RetrievalError;
use ragstream_core::retrieval::{MetadataFilter, PassageId, RankedHit, VectorCollection};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ChromaCollection {
    name: String,
    id: String,
    base_url: String,
    passage_id_key: String,
    client: reqwest::Client,
}

impl ChromaCollection {
    /// Resolve `name` to its collection id on the server.
    pub async fn connect(
        base_url: &str,
        name: &str,
        passage_id_key: &str,
        timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::InvalidConfig(format!("HTTP client: {e}")))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let unavailable = |reason: String| RetrievalError::CollectionUnavailable {
            collection: name.to_string(),
            reason,
        };

        let response = client
            .get(format!("{base_url}/api/v1/collections/{name}"))
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("lookup returned {}", response.status())));
        }

        let info: CollectionInfo = response
            .json()
            .await
            .map_err(|e| unavailable(format!("bad collection info: {e}")))?;

        info!(collection = %name, id = %info.id, "Connected to Chroma collection");

        Ok(Self {
            name: name.to_string(),
            id: info.id,
            base_url,
            passage_id_key: passage_id_key.to_string(),
            client,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> RetrievalError {
        RetrievalError::CollectionUnavailable {
            collection: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl VectorCollection for ChromaCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RankedHit>, RetrievalError> {
        let mut body = serde_json::json!({
            "query_embeddings": [vector],
            "n_results": k,
            "include": ["metadatas"],
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["where"] = serde_json::Value::Object(filter.clone());
        }

        debug!(collection = %self.name, k, "Querying Chroma collection");

        let response = self
            .client
            .post(format!(
                "{}/api/v1/collections/{}/query",
                self.base_url, self.id
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("query returned {status}: {text}")));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("bad query response: {e}")))?;

        Ok(ranked_hits(&self.name, &self.passage_id_key, parsed))
    }
}

/// Turn the first query's metadata rows into ranked passage ids.
fn ranked_hits(collection: &str, key: &str, response: QueryResponse) -> Vec<RankedHit> {
    let rows = response.metadatas.into_iter().next().unwrap_or_default();

    rows.into_iter()
        .enumerate()
        .filter_map(|(i, meta)| {
            let value = meta.as_ref().and_then(|m| m.get(key));
            match value.and_then(passage_id_from_value) {
                Some(id) => Some(RankedHit { id, rank: i + 1 }),
                None => {
                    warn!(
                        collection = %collection,
                        rank = i + 1,
                        value = ?value,
                        "Hit has no usable passage id, skipping"
                    );
                    None
                }
            }
        })
        .collect()
}

fn passage_id_from_value(value: &serde_json::Value) -> Option<PassageId> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(PassageId::new(s.trim())),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string()))
            .map(PassageId),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    metadatas: Vec<Vec<Option<serde_json::Map<String, serde_json::Value>>>>,
}
