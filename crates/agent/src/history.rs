//! Per-session conversation history.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rendered in place of history when there is none.
pub const EMPTY_HISTORY_PLACEHOLDER: &str = "No conversation history yet.";

/// Rendered in place of history when not even the latest turn fits.
pub const HISTORY_TOO_LONG_PLACEHOLDER: &str =
    "History is too long to be included in this turn's context.";

const TURN_SEPARATOR: &str = "\n---\n";

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    pub fn format(&self) -> String {
        format!("User: {}\nAssistant: {}", self.user, self.assistant)
    }
}

/// Render turns oldest first, the way prompts expect them.
pub fn format_turns(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(ConversationTurn::format)
        .collect::<Vec<_>>()
        .join(TURN_SEPARATOR)
}

/// A sliding window over the most recent turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    window: usize,
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            turns: Vec::new(),
        }
    }

    /// Append a finished turn, evicting the oldest beyond the window.
    ///
    /// Returns `false` (and records nothing) when the answer is blank.
    pub fn record(&mut self, user: impl Into<String>, answer: &str) -> bool {
        let answer = answer.trim();
        if answer.is_empty() {
            debug!("Empty answer, not recording turn");
            return false;
        }

        self.turns.push(ConversationTurn::new(user, answer));
        if self.turns.len() > self.window {
            let excess = self.turns.len() - self.window;
            self.turns.drain(..excess);
        }
        true
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The whole window formatted, or the empty-history placeholder.
    pub fn format(&self) -> String {
        if self.turns.is_empty() {
            EMPTY_HISTORY_PLACEHOLDER.to_string()
        } else {
            format_turns(&self.turns)
        }
    }
}
