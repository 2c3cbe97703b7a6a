//! The streaming tool-call engine.
//!
//! Drives one turn through as many model rounds as it takes:
//!
//! 1. **Stream** a model response; text deltas go to the caller as they
//!    arrive, tool-call fragments are accumulated per index
//! 2. **At end-of-turn** with no tool calls, the round's text is the answer
//! 3. **Otherwise** parse the calls, run them all concurrently, append the
//!    assistant tool-call message and one tool-result message per call
//! 4. **Repeat** from step 1 with the longer transcript
//!
//! The loop stops at `max_iterations` rounds with a fixed fallback message.
//! The next model call is never issued before every tool of the current
//! round has returned.

pub mod accumulator;
pub mod executor;

pub use accumulator::{AssembledCall, ToolCallAccumulator, ToolCallFragment};
pub use executor::{Dispatched, SESSION_META_KEY, ToolExecutor, ToolOutcome};

use crate::stream_event::StreamEvent;
use chrono::Utc;
use ragstream_config::{EngineConfig, ErrorMessages, LlmConfig, TextPolicy};
use ragstream_core::error::{ErrorKind, ProviderError};
use ragstream_core::event::{DomainEvent, EventBus};
use ragstream_core::message::Message;
use ragstream_core::provider::{Provider, ProviderRequest, Usage};
use ragstream_core::tool::ToolRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Everything the engine needs to know besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_iterations: usize,
    pub event_buffer: usize,
    pub tool_error_max_chars: usize,
    pub text_policy: TextPolicy,
    pub context_tools: Vec<String>,
    pub fallback_message: String,
    pub error_messages: ErrorMessages,
}

impl EngineSettings {
    pub fn from_config(llm: &LlmConfig, engine: &EngineConfig) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: Some(llm.max_response_tokens),
            max_iterations: engine.max_iterations,
            event_buffer: engine.event_buffer,
            tool_error_max_chars: engine.tool_error_max_chars,
            text_policy: engine.text_policy,
            context_tools: engine.context_tools.clone(),
            fallback_message: engine.fallback_message.clone(),
            error_messages: engine.error_messages.clone(),
        }
    }

    /// Engine defaults for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::from_config(&LlmConfig::default(), &EngineConfig::default())
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_text_policy(mut self, policy: TextPolicy) -> Self {
        self.text_policy = policy;
        self
    }

    pub fn with_context_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_tools = names.into_iter().map(Into::into).collect();
        self
    }

    /// The caller-facing text for a turn that failed with `kind`.
    pub fn error_message(&self, kind: ErrorKind) -> &str {
        match kind {
            ErrorKind::ContextWindowExceeded => &self.error_messages.context_window,
            ErrorKind::ProviderRejected => &self.error_messages.rejected,
            _ => &self.error_messages.network,
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer.
    Answered,
    /// The round cap was hit and the fallback message was sent.
    IterationCap,
    /// A turn-level error was sent.
    Failed(ErrorKind),
    /// The caller stopped listening.
    Disconnected,
}

impl TurnOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Answered => "done",
            Self::IterationCap => "iteration_cap",
            Self::Failed(_) => "error",
            Self::Disconnected => "disconnected",
        }
    }
}

/// What a finished turn leaves behind.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub rounds: usize,
    pub tool_calls: usize,
    /// The final answer: the last round's text, or the fallback message.
    pub answer: String,
    pub transcript: Vec<Message>,
    pub usage: Option<Usage>,
}

/// Forwards events until the caller goes away, then swallows them.
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    open: bool,
}

impl EventSink {
    async fn send(&mut self, event: StreamEvent) -> bool {
        if self.open && self.tx.send(event).await.is_err() {
            debug!("Caller stopped listening, no longer forwarding events");
            self.open = false;
        }
        self.open
    }
}

/// Turn-local bookkeeping.
struct TurnState {
    transcript: Vec<Message>,
    rounds: usize,
    tool_calls: usize,
    usage: Option<Usage>,
}

impl TurnState {
    fn add_usage(&mut self, usage: Usage) {
        let total = self.usage.get_or_insert(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        });
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
    }
}

#[derive(Clone)]
pub struct ToolCallEngine {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    settings: Arc<EngineSettings>,
    events: Option<Arc<EventBus>>,
}

impl ToolCallEngine {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, settings: EngineSettings) -> Self {
        let tools = Arc::new(tools);
        let executor = Self::build_executor(&tools, &settings, None);
        Self {
            provider,
            tools,
            executor,
            settings: Arc::new(settings),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.executor = Self::build_executor(&self.tools, &self.settings, Some(events.clone()));
        self.events = Some(events);
        self
    }

    fn build_executor(
        tools: &Arc<ToolRegistry>,
        settings: &EngineSettings,
        events: Option<Arc<EventBus>>,
    ) -> Arc<ToolExecutor> {
        let mut executor = ToolExecutor::new(tools.clone())
            .with_context_tools(settings.context_tools.iter().cloned())
            .with_error_max_chars(settings.tool_error_max_chars);
        if let Some(events) = events {
            executor = executor.with_event_bus(events);
        }
        Arc::new(executor)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Start a turn in the background and return its event stream.
    ///
    /// The channel is bounded by `event_buffer`, so a slow reader slows the
    /// model stream down rather than buffering without limit. Dropping the
    /// receiver abandons the turn once the in-flight round's tools finish.
    pub fn run_turn(
        &self,
        transcript: Vec<Message>,
        session_meta: Option<serde_json::Value>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(transcript, session_meta.as_ref(), tx).await;
        });
        rx
    }

    /// Run a turn to completion on the current task, sending events to `tx`.
    pub async fn drive(
        &self,
        transcript: Vec<Message>,
        session_meta: Option<&serde_json::Value>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> TurnReport {
        let mut sink = EventSink { tx, open: true };
        let mut state = TurnState {
            transcript,
            rounds: 0,
            tool_calls: 0,
            usage: None,
        };
        let definitions = self.tools.definitions();
        let policy = self.settings.text_policy;

        info!(
            messages = state.transcript.len(),
            tools = definitions.len(),
            "Starting turn"
        );

        loop {
            if state.rounds >= self.settings.max_iterations {
                warn!(
                    rounds = state.rounds,
                    "Max tool iterations reached, sending fallback message"
                );
                let answer = self.settings.fallback_message.clone();
                sink.send(StreamEvent::text(answer.clone())).await;
                state.transcript.push(Message::assistant(answer.clone()));
                return self.finish(&mut sink, state, TurnOutcome::IterationCap, answer).await;
            }
            state.rounds += 1;

            debug!(round = state.rounds, messages = state.transcript.len(), "Requesting model");
            let request = ProviderRequest {
                model: self.settings.model.clone(),
                messages: state.transcript.clone(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: definitions.clone(),
                stream: true,
            };

            let mut stream = match self.provider.stream(request).await {
                Ok(stream) => stream,
                Err(e) => return self.fail(&mut sink, state, e).await,
            };

            // ── Collect one round ──────────────────────────────────────────
            let mut accumulator = ToolCallAccumulator::new();
            let mut round_text = String::new();
            let mut ended = false;

            while let Some(item) = stream.recv().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => return self.fail(&mut sink, state, e).await,
                };

                if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                    round_text.push_str(&text);
                    if policy == TextPolicy::Stream && !sink.send(StreamEvent::text(text)).await {
                        info!(round = state.rounds, "Caller disconnected mid-stream, abandoning turn");
                        return self
                            .finish(&mut sink, state, TurnOutcome::Disconnected, round_text)
                            .await;
                    }
                }
                for delta in &chunk.tool_call_deltas {
                    accumulator.push(delta);
                }
                if let Some(usage) = chunk.usage {
                    state.add_usage(usage);
                }
                if chunk.done {
                    ended = true;
                    break;
                }
            }
            if !ended {
                warn!(round = state.rounds, "Model stream closed without an end-of-turn signal");
            }

            // ── Final answer ───────────────────────────────────────────────
            if accumulator.is_empty() {
                if policy == TextPolicy::Buffer && !round_text.is_empty() {
                    sink.send(StreamEvent::text(round_text.clone())).await;
                }
                state.transcript.push(Message::assistant(round_text.clone()));
                return self
                    .finish(&mut sink, state, TurnOutcome::Answered, round_text)
                    .await;
            }

            // ── Tool round ─────────────────────────────────────────────────
            let calls = accumulator.finish();
            state.tool_calls += calls.len();
            if policy == TextPolicy::Buffer && !round_text.is_empty() {
                debug!(chars = round_text.len(), "Holding back text from a tool-calling round");
            }
            info!(round = state.rounds, calls = calls.len(), "Executing tool calls");

            state.transcript.push(Message::assistant_tool_calls(
                round_text,
                calls.iter().map(AssembledCall::to_message_call).collect(),
            ));

            let dispatched = self.executor.dispatch(calls, session_meta);
            for entry in dispatched.iter().filter(|d| d.is_running()) {
                sink.send(StreamEvent::ToolInvoked {
                    call_id: entry.call_id().to_string(),
                    name: entry.name().to_string(),
                })
                .await;
            }

            for outcome in self.executor.join(dispatched).await {
                state
                    .transcript
                    .push(Message::tool_result(&outcome.call_id, &outcome.content));
                sink.send(StreamEvent::ToolResult {
                    call_id: outcome.call_id,
                    name: outcome.name,
                    content: outcome.content,
                    success: outcome.success,
                })
                .await;
            }

            if !sink.open {
                info!(round = state.rounds, "Caller disconnected, discarding turn after tools finished");
                return self
                    .finish(&mut sink, state, TurnOutcome::Disconnected, String::new())
                    .await;
            }
        }
    }

    async fn fail(&self, sink: &mut EventSink, state: TurnState, error: ProviderError) -> TurnReport {
        let kind = error.kind();
        warn!(round = state.rounds, kind = %kind, error = %error, "Turn failed");
        sink.send(StreamEvent::Error {
            kind,
            message: self.settings.error_message(kind).to_string(),
        })
        .await;
        self.finish(sink, state, TurnOutcome::Failed(kind), String::new())
            .await
    }

    async fn finish(
        &self,
        sink: &mut EventSink,
        state: TurnState,
        outcome: TurnOutcome,
        answer: String,
    ) -> TurnReport {
        if matches!(outcome, TurnOutcome::Answered | TurnOutcome::IterationCap) {
            sink.send(StreamEvent::Done {
                rounds: state.rounds,
                tool_calls: state.tool_calls,
                usage: state.usage.clone(),
            })
            .await;
        }

        if let Some(events) = &self.events {
            events.publish(DomainEvent::TurnFinished {
                rounds: state.rounds,
                outcome: outcome.label().to_string(),
                timestamp: Utc::now(),
            });
        }

        info!(
            rounds = state.rounds,
            tool_calls = state.tool_calls,
            outcome = outcome.label(),
            "Turn finished"
        );

        TurnReport {
            outcome,
            rounds: state.rounds,
            tool_calls: state.tool_calls,
            answer,
            transcript: state.transcript,
            usage: state.usage,
        }
    }
}
