//! One conversation: a budgeted system prompt per turn, the engine, and the
//! history window that carries answers into the next prompt.
//!
//! A session is not locked internally. Callers must not run two turns of the
//! same session at once.

use crate::context::{BuiltPrompt, PromptBudgeter, PromptInput};
use crate::engine::{ToolCallEngine, TurnOutcome, TurnReport};
use crate::history::ConversationHistory;
use crate::stream_event::StreamEvent;
use ragstream_core::message::Message;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Template placeholder receiving the user's question.
pub const USER_QUERY_FIELD: &str = "user_query";

/// What a finished turn produced, from the session's point of view.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub outcome: TurnOutcome,
    /// The answer text as the caller received it.
    pub answer: String,
    pub rounds: usize,
    pub tool_calls: usize,
    /// The prompt the turn started from.
    pub prompt: BuiltPrompt,
    /// Whether the turn was added to the history window.
    pub recorded: bool,
}

pub struct ChatSession {
    engine: ToolCallEngine,
    budgeter: PromptBudgeter,
    template: String,
    fields: Vec<(String, String)>,
    history: ConversationHistory,
    session_meta: Option<serde_json::Value>,
}

impl ChatSession {
    pub fn new(
        engine: ToolCallEngine,
        budgeter: PromptBudgeter,
        template: impl Into<String>,
        history_window: usize,
    ) -> Self {
        Self {
            engine,
            budgeter,
            template: template.into(),
            fields: Vec::new(),
            history: ConversationHistory::new(history_window),
            session_meta: None,
        }
    }

    /// A fixed template field, substituted on every turn.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Caller context handed to allow-listed tools.
    pub fn with_session_meta(mut self, meta: serde_json::Value) -> Self {
        self.session_meta = Some(meta);
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn engine(&self) -> &ToolCallEngine {
        &self.engine
    }

    /// Forget every recorded turn.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Build the system prompt for `user_text` without running anything.
    pub fn prepare(&self, user_text: &str, context: &[String]) -> BuiltPrompt {
        let mut input = PromptInput::new(&self.template)
            .field(USER_QUERY_FIELD, user_text)
            .history(self.history.turns())
            .context(context);
        for (name, value) in &self.fields {
            input = input.field(name, value.clone());
        }
        self.budgeter.build(&input)
    }

    /// Run one turn. `on_event` sees every event in order as it arrives.
    ///
    /// The answer is recorded in the history window only when the model
    /// actually answered.
    pub async fn ask<F>(&mut self, user_text: &str, context: &[String], mut on_event: F) -> TurnSummary
    where
        F: FnMut(&StreamEvent),
    {
        let prompt = self.prepare(user_text, context);
        if prompt.hard_truncated {
            warn!(tokens = prompt.tokens, "System prompt was hard-truncated to fit the context window");
        }
        debug!(
            tokens = prompt.tokens,
            history_turns = prompt.history.units_included,
            context_units = prompt.context.units_included,
            "Built system prompt"
        );

        let transcript = vec![Message::system(prompt.text.clone()), Message::user(user_text)];
        let (tx, mut rx) = mpsc::channel(self.engine.settings().event_buffer.max(1));

        let consume = async {
            let mut streamed = String::new();
            while let Some(event) = rx.recv().await {
                if let StreamEvent::TextDelta { content } = &event {
                    streamed.push_str(content);
                }
                on_event(&event);
            }
            streamed
        };
        let (report, streamed): (TurnReport, String) = tokio::join!(
            self.engine.drive(transcript, self.session_meta.as_ref(), tx),
            consume
        );

        let recorded = report.outcome == TurnOutcome::Answered
            && self.history.record(user_text, &report.answer);
        info!(
            outcome = ?report.outcome,
            rounds = report.rounds,
            recorded,
            history_turns = self.history.len(),
            "Turn complete"
        );

        TurnSummary {
            outcome: report.outcome,
            answer: streamed,
            rounds: report.rounds,
            tool_calls: report.tool_calls,
            prompt,
            recorded,
        }
    }
}
