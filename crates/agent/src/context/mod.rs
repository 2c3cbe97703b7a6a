//! Prompt assembly under a hard token ceiling.
//!
//! | Block | Source | Trim strategy |
//! |-------|--------|---------------|
//! | Fixed fields | Caller | Never trimmed |
//! | Conversation history | Recent turns | Oldest turns dropped, then placeholder |
//! | Retrieved context | Fused passages | Least relevant dropped, then token cut |

pub mod budgeter;
pub mod template;
pub mod token;

pub use budgeter::{
    BlockStats, BuiltPrompt, CONTEXT_FIELD, HISTORY_FIELD, PromptBudget, PromptBudgeter,
    PromptInput,
};
pub use token::{HeuristicTokenizer, Tokenizer};

#[cfg(feature = "hf-tokenizer")]
pub use token::HfTokenizer;
