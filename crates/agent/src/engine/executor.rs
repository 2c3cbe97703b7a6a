//! Concurrent tool dispatch for one round.
//!
//! Every known call of a round is spawned onto the runtime at once, then the
//! round joins on all of them. A failing or panicking tool becomes a bounded
//! error string for that call only. Unknown tools are never invoked but
//! still get an error result, so every call the model made is answered.

use super::accumulator::AssembledCall;
use chrono::Utc;
use ragstream_core::error::ToolError;
use ragstream_core::event::{DomainEvent, EventBus};
use ragstream_core::tool::{ToolRegistry, ToolResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Argument key under which caller context reaches allow-listed tools.
pub const SESSION_META_KEY: &str = "session_meta";

/// What one call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    /// Tool-result message content for the model.
    pub content: String,
    pub success: bool,
}

/// A call that was dispatched, or skipped because nothing is registered
/// under its name.
pub enum Dispatched {
    Running {
        call_id: String,
        name: String,
        handle: JoinHandle<(Result<ToolResult, ToolError>, u64)>,
    },
    Unknown {
        call_id: String,
        name: String,
    },
}

impl Dispatched {
    pub fn call_id(&self) -> &str {
        match self {
            Self::Running { call_id, .. } | Self::Unknown { call_id, .. } => call_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Running { name, .. } | Self::Unknown { name, .. } => name,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

pub struct ToolExecutor {
    tools: Arc<ToolRegistry>,
    context_tools: HashSet<String>,
    error_max_chars: usize,
    events: Option<Arc<EventBus>>,
}

impl ToolExecutor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            context_tools: HashSet::new(),
            error_max_chars: 512,
            events: None,
        }
    }

    /// Tools that receive `session_meta` in their arguments.
    pub fn with_context_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_tools = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_error_max_chars(mut self, max: usize) -> Self {
        self.error_max_chars = max;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Spawn every known call. Must be called from within a tokio runtime.
    pub fn dispatch(
        &self,
        calls: Vec<AssembledCall>,
        session_meta: Option<&serde_json::Value>,
    ) -> Vec<Dispatched> {
        calls
            .into_iter()
            .map(|call| {
                let Some(tool) = self.tools.get(&call.name) else {
                    warn!(tool = %call.name, call_id = %call.id, "Model requested an unknown tool, skipping");
                    return Dispatched::Unknown {
                        call_id: call.id,
                        name: call.name,
                    };
                };

                let mut arguments = call.arguments;
                if self.context_tools.contains(&call.name) {
                    if let (Some(meta), Some(map)) = (session_meta, arguments.as_object_mut()) {
                        map.insert(SESSION_META_KEY.to_string(), meta.clone());
                    }
                }

                debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
                let handle = tokio::spawn(async move {
                    let start = Instant::now();
                    let result = tool.execute(arguments).await;
                    (result, start.elapsed().as_millis() as u64)
                });

                Dispatched::Running {
                    call_id: call.id,
                    name: call.name,
                    handle,
                }
            })
            .collect()
    }

    /// Wait for every dispatched call. Outcomes keep dispatch order.
    pub async fn join(&self, dispatched: Vec<Dispatched>) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(dispatched.len());

        for entry in dispatched {
            let outcome = match entry {
                Dispatched::Unknown { call_id, name } => ToolOutcome {
                    content: format!("Error: tool '{name}' is not available"),
                    call_id,
                    name,
                    success: false,
                },
                Dispatched::Running {
                    call_id,
                    name,
                    handle,
                } => {
                    let (content, success, duration_ms) = match handle.await {
                        Ok((Ok(result), ms)) if result.success => (result.output, true, ms),
                        Ok((Ok(result), ms)) => {
                            warn!(tool = %name, "Tool reported failure");
                            (self.bounded(result.output), false, ms)
                        }
                        Ok((Err(e), ms)) => {
                            warn!(tool = %name, error = %e, "Tool execution failed");
                            (self.bounded(format!("Error: {e}")), false, ms)
                        }
                        Err(e) => {
                            warn!(tool = %name, error = %e, "Tool task did not complete");
                            (self.bounded(format!("Error: tool '{name}' crashed")), false, 0)
                        }
                    };

                    if let Some(events) = &self.events {
                        events.publish(DomainEvent::ToolExecuted {
                            tool_name: name.clone(),
                            success,
                            duration_ms,
                            timestamp: Utc::now(),
                        });
                    }

                    ToolOutcome {
                        call_id,
                        name,
                        content,
                        success,
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Dispatch and join in one step.
    pub async fn execute_round(
        &self,
        calls: Vec<AssembledCall>,
        session_meta: Option<&serde_json::Value>,
    ) -> Vec<ToolOutcome> {
        let dispatched = self.dispatch(calls, session_meta);
        self.join(dispatched).await
    }

    fn bounded(&self, message: String) -> String {
        truncate_chars(message, self.error_max_chars)
    }
}

/// Cut `s` to at most `max` characters, marking the cut with `...`.
pub fn truncate_chars(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        return s;
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(&"..."[..max.min(3)]);
    out
}
