//! Caller-facing streaming events.
//!
//! One turn produces an ordered sequence of these on a bounded channel:
//! - `text_delta`: user-visible answer text, in arrival order
//! - `tool_invoked`: a tool call was dispatched
//! - `tool_result`: that tool call returned
//! - `error`: the turn failed, no `done` follows
//! - `done`: the turn is complete

use ragstream_core::error::ErrorKind;
use ragstream_core::provider::Usage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of answer text.
    TextDelta { content: String },

    /// A tool call is running.
    ToolInvoked { call_id: String, name: String },

    /// A tool call returned. `content` is what the model will see.
    ToolResult {
        call_id: String,
        name: String,
        content: String,
        success: bool,
    },

    /// The turn ended on a turn-level error.
    Error { kind: ErrorKind, message: String },

    /// The turn is complete.
    Done {
        rounds: usize,
        tool_calls: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    /// Event name for SSE framing.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolInvoked { .. } => "tool_invoked",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::TextDelta {
            content: content.into(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}
