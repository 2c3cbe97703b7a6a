//! The fusion retriever.
//!
//! One query embedding, one concurrent search per collection, Reciprocal Rank
//! Fusion over the ranked lists, then a single batched hydration of the
//! winners. A collection that fails or times out contributes an empty list;
//! a selected id missing from the store is dropped. Both are logged, neither
//! fails the call.

use chrono::Utc;
use futures::future::join_all;
use ragstream_config::RetrieverConfig;
use ragstream_core::error::RetrievalError;
use ragstream_core::event::{DomainEvent, EventBus};
use ragstream_core::retrieval::{
    Embedder, EmbeddingTask, MetadataFilter, Passage, PassageId, PassageStore, RankedHit,
    VectorCollection,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fusion::{FusedHit, reciprocal_rank_fusion};

/// Parameters of one fusion call.
#[derive(Debug, Clone)]
pub struct FusionQuery {
    pub text: String,
    pub top_k_per_collection: usize,
    pub rrf_k: f64,
    pub max_selected: usize,
    pub filter: Option<MetadataFilter>,
}

impl FusionQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self::from_config(text, &RetrieverConfig::default())
    }

    pub fn from_config(text: impl Into<String>, config: &RetrieverConfig) -> Self {
        Self {
            text: text.into(),
            top_k_per_collection: config.top_k,
            rrf_k: f64::from(config.rrf_k),
            max_selected: config.max_passages_to_select,
            filter: None,
        }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k_per_collection = k;
        self
    }

    pub fn with_rrf_k(mut self, rrf_k: f64) -> Self {
        self.rrf_k = rrf_k;
        self
    }

    pub fn with_max_selected(mut self, n: usize) -> Self {
        self.max_selected = n;
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Passages plus what happened on the way.
#[derive(Debug, Clone, Default)]
pub struct FusionOutcome {
    /// Hydrated passages in fused-rank order.
    pub passages: Vec<Passage>,
    /// Selected ids with their fused scores, best first.
    pub selected: Vec<FusedHit>,
    /// Collections that errored or timed out.
    pub failed_collections: Vec<String>,
    /// Selected ids the store did not return.
    pub hydration_misses: Vec<PassageId>,
}

pub struct FusionRetriever {
    embedder: Arc<dyn Embedder>,
    collections: Vec<Arc<dyn VectorCollection>>,
    store: Arc<dyn PassageStore>,
    collection_timeout: Option<Duration>,
    events: Option<Arc<EventBus>>,
}

impl FusionRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        collections: Vec<Arc<dyn VectorCollection>>,
        store: Arc<dyn PassageStore>,
    ) -> Self {
        Self {
            embedder,
            collections,
            store,
            collection_timeout: None,
            events: None,
        }
    }

    /// Treat a collection that takes longer than `timeout` as failed.
    pub fn with_collection_timeout(mut self, timeout: Duration) -> Self {
        self.collection_timeout = Some(timeout);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.iter().map(|c| c.name()).collect()
    }

    /// Fused, hydrated passages for `query`, best first.
    pub async fn fuse(&self, query: &FusionQuery) -> Result<Vec<Passage>, RetrievalError> {
        Ok(self.fuse_detailed(query).await?.passages)
    }

    /// Like [`fuse`](Self::fuse), also reporting degraded collections and
    /// hydration misses.
    ///
    /// Errors only when the query cannot be embedded or the store itself
    /// fails; an empty result is a valid outcome.
    pub async fn fuse_detailed(&self, query: &FusionQuery) -> Result<FusionOutcome, RetrievalError> {
        info!(query = %query.text, collections = self.collections.len(), "Starting fusion retrieval");

        let vector = self
            .embedder
            .embed(std::slice::from_ref(&query.text), EmbeddingTask::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingFailed("no vector for query".into()))?;

        let searches = self.collections.iter().map(|collection| {
            self.search_one(
                collection.as_ref(),
                &vector,
                query.top_k_per_collection,
                query.filter.as_ref(),
            )
        });
        let results = join_all(searches).await;

        let mut outcome = FusionOutcome::default();
        let mut lists = Vec::with_capacity(results.len());
        for (collection, result) in self.collections.iter().zip(results) {
            match result {
                Ok(hits) => lists.push(hits),
                Err(e) => {
                    warn!(collection = %collection.name(), error = %e, "Collection unavailable, continuing without it");
                    outcome.failed_collections.push(collection.name().to_string());
                    lists.push(Vec::new());
                }
            }
        }

        let mut fused = reciprocal_rank_fusion(&lists, query.rrf_k);
        let unique = fused.len();
        fused.truncate(query.max_selected);
        info!(unique, selected = fused.len(), "RRF fusion complete");

        if fused.is_empty() {
            self.publish(&outcome);
            return Ok(outcome);
        }

        let ids: Vec<PassageId> = fused.iter().map(|h| h.id.clone()).collect();
        debug!(ids = ?ids, "Hydrating selected passages");
        let mut by_id: HashMap<PassageId, Passage> = self
            .store
            .fetch_by_ids(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        for id in ids {
            match by_id.remove(&id) {
                Some(passage) => outcome.passages.push(passage),
                None => {
                    warn!(passage_id = %id, "Passage missing from store, dropping");
                    outcome.hydration_misses.push(id);
                }
            }
        }
        outcome.selected = fused;

        self.publish(&outcome);
        Ok(outcome)
    }

    async fn search_one(
        &self,
        collection: &dyn VectorCollection,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RankedHit>, RetrievalError> {
        let search = collection.search(vector, k, filter);
        let Some(timeout) = self.collection_timeout else {
            return search.await;
        };

        match tokio::time::timeout(timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::CollectionUnavailable {
                collection: collection.name().to_string(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    fn publish(&self, outcome: &FusionOutcome) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::RetrievalCompleted {
                collections_queried: self.collections.len(),
                collections_failed: outcome.failed_collections.len(),
                passages_returned: outcome.passages.len(),
                hydration_misses: outcome.hydration_misses.len(),
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryPassageStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every query embeds to the same vector; counts calls.
    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(
            &self,
            texts: &[String],
            _task: EmbeddingTask,
        ) -> Result<Vec<Vec<f32>>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Returns a fixed ranked list, optionally after a delay.
    struct StaticCollection {
        name: String,
        ids: Vec<&'static str>,
        delay: Option<Duration>,
    }

    impl StaticCollection {
        fn new(name: &str, ids: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                ids,
                delay: None,
            })
        }

        fn slow(name: &str, ids: Vec<&'static str>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                ids,
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl VectorCollection for StaticCollection {
        fn name(&self) -> &str {
            &self.name
        }

        async fn search(
            &self,
            _vector: &[f32],
            k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<RankedHit>, RetrievalError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(RankedHit::from_ordered(
                self.ids.iter().take(k).map(|s| PassageId::from(*s)),
            ))
        }
    }

    struct BrokenCollection;

    #[async_trait]
    impl VectorCollection for BrokenCollection {
        fn name(&self) -> &str {
            "broken"
        }

        async fn search(
            &self,
            _vector: &[f32],
            _k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<RankedHit>, RetrievalError> {
            Err(RetrievalError::CollectionUnavailable {
                collection: "broken".into(),
                reason: "connection refused".into(),
            })
        }
    }

    /// Returns passages in reverse id order to prove the retriever reorders.
    struct ReversingStore {
        inner: InMemoryPassageStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PassageStore for ReversingStore {
        async fn fetch_by_ids(&self, ids: &[PassageId]) -> Result<Vec<Passage>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut got = self.inner.fetch_by_ids(ids).await?;
            got.reverse();
            Ok(got)
        }
    }

    async fn store_with(ids: &[&str]) -> Arc<ReversingStore> {
        let inner = InMemoryPassageStore::new();
        for id in ids {
            inner
                .upsert(Passage {
                    id: PassageId::from(*id),
                    text: format!("text of {id}"),
                    metadata: Default::default(),
                })
                .await;
        }
        Arc::new(ReversingStore {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    fn ids(passages: &[Passage]) -> Vec<&str> {
        passages.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn fuses_in_rank_order_not_store_order() {
        let store = store_with(&["a", "b", "c", "d"]).await;
        let retriever = FusionRetriever::new(
            Arc::new(CountingEmbedder::default()),
            vec![
                StaticCollection::new("one", vec!["a", "b", "c"]),
                StaticCollection::new("two", vec!["d", "b", "a"]),
            ],
            store,
        );

        let passages = retriever
            .fuse(&FusionQuery::new("q").with_max_selected(3))
            .await
            .unwrap();
        // a: 1/61+1/63, b: 1/62+1/62, d: 1/61, c: 1/63
        assert_eq!(ids(&passages), vec!["a", "b", "d"]);
    }

    #[tokio::test]
    async fn failed_collection_degrades_gracefully() {
        let store = store_with(&["a", "b", "x"]).await;
        let retriever = FusionRetriever::new(
            Arc::new(CountingEmbedder::default()),
            vec![
                StaticCollection::new("one", vec!["a", "b"]),
                Arc::new(BrokenCollection),
                StaticCollection::new("three", vec!["x", "a"]),
            ],
            store,
        );

        let outcome = retriever.fuse_detailed(&FusionQuery::new("q")).await.unwrap();
        assert_eq!(outcome.failed_collections, vec!["broken"]);
        assert_eq!(ids(&outcome.passages), vec!["a", "x", "b"]);
    }

    #[tokio::test]
    async fn embeds_query_exactly_once() {
        let embedder = Arc::new(CountingEmbedder::default());
        let retriever = FusionRetriever::new(
            embedder.clone(),
            vec![
                StaticCollection::new("one", vec!["a"]),
                StaticCollection::new("two", vec!["a"]),
                StaticCollection::new("three", vec!["a"]),
            ],
            store_with(&["a"]).await,
        );

        retriever.fuse(&FusionQuery::new("q")).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hydration_misses_are_dropped() {
        let retriever = FusionRetriever::new(
            Arc::new(CountingEmbedder::default()),
            vec![StaticCollection::new("one", vec!["a", "ghost", "b"])],
            store_with(&["a", "b"]).await,
        );

        let outcome = retriever.fuse_detailed(&FusionQuery::new("q")).await.unwrap();
        assert_eq!(ids(&outcome.passages), vec!["a", "b"]);
        assert_eq!(outcome.hydration_misses, vec![PassageId::from("ghost")]);
        assert_eq!(outcome.selected.len(), 3);
    }

    #[tokio::test]
    async fn empty_everywhere_is_not_an_error() {
        let store = store_with(&[]).await;
        let retriever = FusionRetriever::new(
            Arc::new(CountingEmbedder::default()),
            vec![StaticCollection::new("one", vec![]), Arc::new(BrokenCollection)],
            store.clone(),
        );

        let passages = retriever.fuse(&FusionQuery::new("q")).await.unwrap();
        assert!(passages.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collections_are_searched_concurrently() {
        let delay = Duration::from_millis(100);
        let retriever = FusionRetriever::new(
            Arc::new(CountingEmbedder::default()),
            vec![
                StaticCollection::slow("one", vec!["a"], delay),
                StaticCollection::slow("two", vec!["b"], delay),
                StaticCollection::slow("three", vec!["c"], delay),
            ],
            store_with(&["a", "b", "c"]).await,
        );

        let started = tokio::time::Instant::now();
        let passages = retriever.fuse(&FusionQuery::new("q")).await.unwrap();
        assert_eq!(passages.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_collection_times_out() {
        let retriever = FusionRetriever::new(
            Arc::new(CountingEmbedder::default()),
            vec![
                StaticCollection::new("fast", vec!["a"]),
                StaticCollection::slow("stuck", vec!["b"], Duration::from_secs(60)),
            ],
            store_with(&["a", "b"]).await,
        )
        .with_collection_timeout(Duration::from_secs(2));

        let outcome = retriever.fuse_detailed(&FusionQuery::new("q")).await.unwrap();
        assert_eq!(outcome.failed_collections, vec!["stuck"]);
        assert_eq!(ids(&outcome.passages), vec!["a"]);
    }

    #[tokio::test]
    async fn completion_is_published() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let retriever = FusionRetriever::new(
            Arc::new(CountingEmbedder::default()),
            vec![StaticCollection::new("one", vec!["a"]), Arc::new(BrokenCollection)],
            store_with(&["a"]).await,
        )
        .with_event_bus(bus);

        retriever.fuse(&FusionQuery::new("q")).await.unwrap();
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::RetrievalCompleted {
                collections_queried,
                collections_failed,
                passages_returned,
                ..
            } => {
                assert_eq!(*collections_queried, 2);
                assert_eq!(*collections_failed, 1);
                assert_eq!(*passages_returned, 1);
            }
            other => panic!("Expected RetrievalCompleted, got: {other:?}"),
        }
    }

    #[test]
    fn query_defaults_follow_config() {
        let q = FusionQuery::new("q");
        assert_eq!(q.top_k_per_collection, 10);
        assert_eq!(q.max_selected, 3);
        assert!((q.rrf_k - 60.0).abs() < f64::EPSILON);
    }
}
