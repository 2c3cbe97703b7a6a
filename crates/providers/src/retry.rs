//! Provider retry: bounded exponential backoff around any provider.
//!
//! Only errors that report [`ProviderError::is_transient`] are retried.
//! `ContextWindowExceeded` and authentication failures surface on the first
//! attempt.
//!
//! For streaming, an attempt counts as failed when opening the stream fails
//! or when the very first item is an error. Once a delta has been forwarded
//! the stream is committed and later errors pass through unchanged, since
//! replaying the request would duplicate text the caller already saw.

use async_trait::async_trait;
use chrono::Utc;
use ragstream_config::RetryConfig;
use ragstream_core::error::ProviderError;
use ragstream_core::event::{DomainEvent, EventBus};
use ragstream_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the forwarding channel that replaces a retried stream.
const FORWARD_BUFFER: usize = 64;

/// Backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// A rate-limit hint from the server raises the delay, but never past
    /// `max_backoff`.
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let exp = self.initial_backoff.as_secs_f64() * factor;
        let mut delay = Duration::from_secs_f64(exp.min(self.max_backoff.as_secs_f64()));

        if let ProviderError::RateLimited { retry_after_secs } = error {
            delay = delay.max(Duration::from_secs(*retry_after_secs));
        }

        delay.min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Wraps a provider and retries transient failures.
pub struct RetryingProvider {
    name: String,
    inner: Arc<dyn ragstream_core::Provider>,
    policy: RetryPolicy,
    events: Option<Arc<EventBus>>,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ragstream_core::Provider>, policy: RetryPolicy) -> Self {
        Self {
            name: format!("{}+retry", inner.name()),
            inner,
            policy,
            events: None,
        }
    }

    /// Publish a [`DomainEvent::ModelRetry`] for every retry.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut retry = 0u32;
        loop {
            match attempt().await {
                Ok(value) => {
                    if retry > 0 {
                        debug!(provider = %self.inner.name(), op, retries = retry, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && retry < self.policy.max_retries => {
                    let delay = self.policy.delay_for(retry, &e);
                    retry += 1;
                    warn!(
                        provider = %self.inner.name(),
                        op,
                        attempt = retry,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    if let Some(events) = &self.events {
                        events.publish(DomainEvent::ModelRetry {
                            attempt: retry,
                            delay_ms: delay.as_millis() as u64,
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(provider = %self.inner.name(), op, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl ragstream_core::Provider for RetryingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.with_retry("complete", || self.inner.complete(request.clone()))
            .await
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let (first, mut rx) = self
            .with_retry("stream", || {
                let inner = self.inner.clone();
                let request = request.clone();
                async move {
                    let mut rx = inner.stream(request).await?;
                    match rx.recv().await {
                        Some(Err(e)) => Err(e),
                        first => Ok((first, rx)),
                    }
                }
            })
            .await?;

        let (tx, out) = mpsc::channel(FORWARD_BUFFER);
        tokio::spawn(async move {
            if let Some(item) = first {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
            while let Some(item) = rx.recv().await {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(out)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        self.with_retry("embed", || self.inner.embed(request.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstream_core::Provider;
    use ragstream_core::message::Message;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Fails with the queued errors, then streams a short answer.
    struct FlakyProvider {
        failures: Mutex<VecDeque<ProviderError>>,
        fail_inside_stream: bool,
        calls: Mutex<usize>,
    }

    impl FlakyProvider {
        fn new(failures: Vec<ProviderError>) -> Self {
            Self {
                failures: Mutex::new(failures.into()),
                fail_inside_stream: false,
                calls: Mutex::new(0),
            }
        }

        fn failing_inside_stream(mut self) -> Self {
            self.fail_inside_stream = true;
            self
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(ProviderResponse {
                message: Message::assistant("ok"),
                usage: None,
                model: "test-model".into(),
            })
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ChunkReceiver, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let failure = self.failures.lock().unwrap().pop_front();
            let (tx, rx) = mpsc::channel(8);
            match failure {
                Some(err) if !self.fail_inside_stream => return Err(err),
                Some(err) => {
                    tx.send(Err(err)).await.unwrap();
                }
                None => {
                    tx.send(Ok(StreamChunk::text("hel"))).await.unwrap();
                    tx.send(Ok(StreamChunk::text("lo"))).await.unwrap();
                    tx.send(Ok(StreamChunk::done())).await.unwrap();
                }
            }
            Ok(rx)
        }
    }

    fn test_request() -> ProviderRequest {
        ProviderRequest {
            model: "test".into(),
            messages: vec![Message::user("hello")],
            temperature: 0.7,
            max_tokens: None,
            tools: vec![],
            stream: true,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(8_000),
            multiplier: 2.0,
        }
    }

    async fn drain(mut rx: ChunkReceiver) -> String {
        let mut text = String::new();
        while let Some(item) = rx.recv().await {
            if let Some(c) = item.unwrap().content {
                text.push_str(&c);
            }
        }
        text
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy(10);
        let net = ProviderError::Network("reset".into());
        let delays: Vec<u64> = (0..6)
            .map(|r| p.delay_for(r, &net).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000]);
    }

    #[test]
    fn rate_limit_hint_raises_delay_within_cap() {
        let p = policy(3);
        let limited = ProviderError::RateLimited { retry_after_secs: 3 };
        assert_eq!(p.delay_for(0, &limited), Duration::from_secs(3));

        let long = ProviderError::RateLimited { retry_after_secs: 60 };
        assert_eq!(p.delay_for(0, &long), Duration::from_millis(8_000));
    }

    #[test]
    fn policy_from_config_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.initial_backoff, Duration::from_millis(500));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_open_failure_is_retried() {
        let inner = Arc::new(FlakyProvider::new(vec![
            ProviderError::Network("reset".into()),
            ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into(),
            },
        ]));
        let provider = RetryingProvider::new(inner.clone(), policy(3));

        let started = tokio::time::Instant::now();
        let rx = provider.stream(test_request()).await.unwrap();
        assert_eq!(drain(rx).await, "hello");
        assert_eq!(inner.calls(), 3);
        // 500ms + 1000ms of backoff on the paused clock
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn first_item_error_is_retried() {
        let inner = Arc::new(
            FlakyProvider::new(vec![ProviderError::StreamInterrupted("eof".into())])
                .failing_inside_stream(),
        );
        let provider = RetryingProvider::new(inner.clone(), policy(2));

        let rx = provider.stream(test_request()).await.unwrap();
        assert_eq!(drain(rx).await, "hello");
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn context_window_is_never_retried() {
        let inner = Arc::new(FlakyProvider::new(vec![
            ProviderError::ContextWindowExceeded("too long".into()),
        ]));
        let provider = RetryingProvider::new(inner.clone(), policy(3));

        let err = provider.stream(test_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ContextWindowExceeded(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let inner = Arc::new(FlakyProvider::new(vec![
            ProviderError::Network("1".into()),
            ProviderError::Network("2".into()),
            ProviderError::Network("3".into()),
        ]));
        let provider = RetryingProvider::new(inner.clone(), policy(2));

        let err = provider.complete(test_request()).await.unwrap_err();
        match err {
            ProviderError::Network(msg) => assert_eq!(msg, "3"),
            other => panic!("Expected Network, got: {other:?}"),
        }
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_published() {
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();
        let inner = Arc::new(FlakyProvider::new(vec![ProviderError::Timeout("slow".into())]));
        let provider = RetryingProvider::new(inner, policy(1)).with_event_bus(bus);

        provider.complete(test_request()).await.unwrap();

        let event = events.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ModelRetry {
                attempt, delay_ms, ..
            } => {
                assert_eq!(*attempt, 1);
                assert_eq!(*delay_ms, 500);
            }
            other => panic!("Expected ModelRetry, got: {other:?}"),
        }
    }

    #[test]
    fn name_marks_wrapper() {
        let provider = RetryingProvider::new(Arc::new(FlakyProvider::new(vec![])), policy(0));
        assert_eq!(provider.name(), "flaky+retry");
    }
}
