//! Shared test helpers for engine and session tests.

use ragstream_core::error::{ProviderError, ToolError};
use ragstream_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallDelta,
};
use ragstream_core::tool::{Tool, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One model round: the items its stream yields, in order.
pub type Script = Vec<Result<StreamChunk, ProviderError>>;

/// A streaming provider that plays back scripted rounds.
///
/// Each call to `stream` plays the next script. With `repeating`, every call
/// plays the same chunks forever. Panics if it runs out of scripts.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    repeat: Option<Vec<StreamChunk>>,
    requests: Mutex<Vec<ProviderRequest>>,
    call_times: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(chunks: Vec<StreamChunk>) -> Self {
        Self {
            repeat: Some(chunks),
            ..Self::new(vec![])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("scripted provider only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.call_times.lock().unwrap().push(tokio::time::Instant::now());

        let script: Script = match &self.repeat {
            Some(chunks) => chunks.iter().cloned().map(Ok).collect(),
            None => {
                let mut scripts = self.scripts.lock().unwrap();
                let count = self.requests.lock().unwrap().len();
                scripts.pop_front().unwrap_or_else(|| {
                    panic!("ScriptedProvider: no more scripts (call #{count})")
                })
            }
        };

        let (tx, rx) = mpsc::channel(script.len().max(1));
        for item in script {
            tx.try_send(item).unwrap();
        }
        Ok(rx)
    }
}

/// A provider whose stream cannot be opened.
pub struct RejectingProvider {
    pub error: fn() -> ProviderError,
}

#[async_trait::async_trait]
impl Provider for RejectingProvider {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err((self.error)())
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        Err((self.error)())
    }
}

/// A round that answers with text split into `parts`.
pub fn text_round(parts: &[&str]) -> Script {
    parts
        .iter()
        .map(|p| Ok(StreamChunk::text(*p)))
        .chain(std::iter::once(Ok(StreamChunk::done())))
        .collect()
}

/// A round that calls one tool, with the arguments sent in one fragment.
pub fn tool_round(id: &str, name: &str, arguments: &str) -> Script {
    vec![Ok(tool_chunk(0, id, name, arguments)), Ok(StreamChunk::done())]
}

pub fn tool_chunk(index: usize, id: &str, name: &str, arguments: &str) -> StreamChunk {
    StreamChunk::tool_delta(ToolCallDelta {
        index,
        id: Some(id.into()),
        name: Some(name.into()),
        arguments: Some(arguments.into()),
    })
}

/// A tool that sleeps for `delay`, records its arguments, and answers with
/// `"{name} done"`.
pub struct SleepyTool {
    pub name: &'static str,
    pub delay: Duration,
    pub seen: Mutex<Vec<serde_json::Value>>,
}

impl SleepyTool {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<serde_json::Value> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Tool for SleepyTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Sleeps, then answers"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.seen.lock().unwrap().push(arguments);
        tokio::time::sleep(self.delay).await;
        Ok(ToolResult::ok(format!("{} done", self.name)))
    }
}
