//! Prompt assembly and the streaming tool-call engine.
//!
//! A turn runs in two stages:
//!
//! 1. **Budget** the system prompt: fixed fields, recent conversation
//!    history and retrieved context, trimmed to fit the model's window
//! 2. **Drive** the model: stream text to the caller, run requested tools
//!    concurrently, feed results back, repeat until the model answers or
//!    the round cap is hit
//!
//! [`ChatSession`] ties both stages to a conversation history window.

pub mod context;
pub mod engine;
pub mod history;
pub mod session;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use context::{
    BlockStats, BuiltPrompt, HeuristicTokenizer, PromptBudget, PromptBudgeter, PromptInput,
    Tokenizer,
};
pub use engine::{EngineSettings, ToolCallEngine, TurnOutcome, TurnReport};
pub use history::{ConversationHistory, ConversationTurn};
pub use session::{ChatSession, TurnSummary};
pub use stream_event::StreamEvent;
