//! Query/passage embedder on top of any provider's embedding endpoint.
//!
//! Asymmetric embedding models expect different instructions on each side,
//! so query texts and passage texts get different prefixes. Requests are
//! split into batches of at most `batch_size` texts.

use async_trait::async_trait;
use ragstream_config::EmbeddingConfig;
use ragstream_core::error::RetrievalError;
use ragstream_core::provider::{EmbeddingRequest, Provider};
use ragstream_core::retrieval::{Embedder, EmbeddingTask};
use std::sync::Arc;
use tracing::debug;

pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    batch_size: usize,
    query_prefix: String,
    passage_prefix: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let defaults = EmbeddingConfig::default();
        Self {
            provider,
            model: model.into(),
            batch_size: defaults.batch_size,
            query_prefix: defaults.query_prefix,
            passage_prefix: defaults.passage_prefix,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &EmbeddingConfig) -> Self {
        Self::new(provider, config.model.clone())
            .with_batch_size(config.batch_size)
            .with_prefixes(config.query_prefix.clone(), config.passage_prefix.clone())
    }

    /// Set the batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_prefixes(mut self, query: impl Into<String>, passage: impl Into<String>) -> Self {
        self.query_prefix = query.into();
        self.passage_prefix = passage.into();
        self
    }

    fn prefix(&self, task: EmbeddingTask) -> &str {
        match task {
            EmbeddingTask::Query => &self.query_prefix,
            EmbeddingTask::Passage => &self.passage_prefix,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prefix = self.prefix(task);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|t| format!("{prefix}{t}")).collect();
            debug!(model = %self.model, ?task, batch = inputs.len(), "Embedding batch");

            let response = self
                .provider
                .embed(EmbeddingRequest {
                    model: self.model.clone(),
                    inputs,
                })
                .await
                .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

            if response.embeddings.len() != batch.len() {
                return Err(RetrievalError::EmbeddingFailed(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    response.embeddings.len()
                )));
            }
            vectors.extend(response.embeddings);
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstream_core::error::ProviderError;
    use ragstream_core::provider::{EmbeddingResponse, ProviderRequest, ProviderResponse};
    use std::sync::Mutex;

    /// Records every embedding request; each vector encodes the input length.
    #[derive(Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("embeddings only".into()))
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            let embeddings = request.inputs.iter().map(|t| vec![t.len() as f32]).collect();
            self.requests.lock().unwrap().push(request.inputs);
            Ok(EmbeddingResponse {
                embeddings,
                model: request.model,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn query_prefix_applied() {
        let provider = Arc::new(RecordingProvider::default());
        let embedder = ProviderEmbedder::new(provider.clone(), "emb");

        embedder
            .embed(&["what is rrf".to_string()], EmbeddingTask::Query)
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0], vec!["task: search result | query: what is rrf"]);
    }

    #[tokio::test]
    async fn passages_batched_in_order() {
        let provider = Arc::new(RecordingProvider::default());
        let embedder = ProviderEmbedder::new(provider.clone(), "emb")
            .with_batch_size(2)
            .with_prefixes("q: ", "p: ");

        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = embedder.embed(&texts, EmbeddingTask::Passage).await.unwrap();

        let sizes: Vec<usize> = provider.requests.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        // "p: " adds 3 characters to each text
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[tokio::test]
    async fn empty_input_makes_no_request() {
        let provider = Arc::new(RecordingProvider::default());
        let embedder = ProviderEmbedder::new(provider.clone(), "emb");

        let vectors = embedder.embed(&[], EmbeddingTask::Query).await.unwrap();
        assert!(vectors.is_empty());
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_maps_to_embedding_failed() {
        struct Down;

        #[async_trait]
        impl Provider for Down {
            fn name(&self) -> &str {
                "down"
            }
            async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
                Err(ProviderError::Network("refused".into()))
            }
            async fn embed(&self, _: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
                Err(ProviderError::Network("refused".into()))
            }
        }

        let embedder = ProviderEmbedder::new(Arc::new(Down), "emb");
        let err = embedder
            .embed(&["x".to_string()], EmbeddingTask::Query)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingFailed(_)));
    }
}
