//! Token-budgeted prompt assembly.
//!
//! Builds a system prompt from a template, a set of fixed fields, and up to
//! two variable blocks, such that the result never exceeds the model's
//! context ceiling:
//!
//! 1. `available = max_tokens - reservation_tokens - fixed field tokens`, floored at 0
//! 2. History gets `floor(available * history_fraction)`; whole turns are
//!    dropped oldest first until the rest fits
//! 3. Retrieved context gets what history left; whole units are dropped from
//!    the least relevant end, and a lone unit that still doesn't fit is
//!    token-truncated
//! 4. Fields are substituted into the template
//! 5. If the result is still over the ceiling, the whole prompt is
//!    hard-truncated and the outcome is flagged as degraded
//!
//! Identical inputs always produce identical prompts.

use crate::context::template;
use crate::context::token::{HeuristicTokenizer, Tokenizer};
use crate::history::{
    ConversationTurn, EMPTY_HISTORY_PLACEHOLDER, HISTORY_TOO_LONG_PLACEHOLDER, format_turns,
};
use ragstream_config::{LlmConfig, PromptConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Template placeholder receiving the trimmed history.
pub const HISTORY_FIELD: &str = "conversation_history";

/// Template placeholder receiving the trimmed retrieved context.
pub const CONTEXT_FIELD: &str = "retrieved_context";

const CONTEXT_SEPARATOR: &str = "\n\n";

// ── Types ─────────────────────────────────────────────────────────────────

/// Immutable per-invocation limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromptBudget {
    /// Hard ceiling for the assembled prompt.
    pub max_tokens: usize,
    /// Tokens held back for the template's own text and the model's reply.
    pub reservation_tokens: usize,
    /// Share of the available tokens history may use, in `[0, 1]`.
    pub history_fraction: f64,
}

impl PromptBudget {
    pub fn from_config(llm: &LlmConfig, prompt: &PromptConfig) -> Self {
        Self {
            max_tokens: llm.max_context_tokens,
            reservation_tokens: prompt.reservation_tokens,
            history_fraction: prompt.history_fraction,
        }
    }
}

/// Everything one prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub template: &'a str,
    /// Fixed fields, never trimmed.
    pub fields: Vec<(&'a str, String)>,
    /// Completed turns, oldest first.
    pub history: Option<&'a [ConversationTurn]>,
    /// Retrieved passages, most relevant first.
    pub context: Option<&'a [String]>,
}

impl<'a> PromptInput<'a> {
    pub fn new(template: &'a str) -> Self {
        Self {
            template,
            fields: Vec::new(),
            history: None,
            context: None,
        }
    }

    pub fn field(mut self, name: &'a str, value: impl Into<String>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    pub fn history(mut self, turns: &'a [ConversationTurn]) -> Self {
        self.history = Some(turns);
        self
    }

    pub fn context(mut self, units: &'a [String]) -> Self {
        self.context = Some(units);
        self
    }
}

/// How one variable block was fitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    pub budget: usize,
    pub tokens: usize,
    pub units_included: usize,
    pub units_total: usize,
    /// A placeholder or token-level cut replaced whole units.
    pub truncated: bool,
}

/// The assembled prompt and how it was trimmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltPrompt {
    pub text: String,
    pub tokens: usize,
    pub fixed_tokens: usize,
    pub available: usize,
    pub history: BlockStats,
    pub context: BlockStats,
    /// The final prompt had to be cut across field boundaries.
    pub hard_truncated: bool,
}

// ── Budgeter ──────────────────────────────────────────────────────────────

pub struct PromptBudgeter {
    tokenizer: Arc<dyn Tokenizer>,
    budget: PromptBudget,
}

impl PromptBudgeter {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, budget: PromptBudget) -> Self {
        Self { tokenizer, budget }
    }

    /// A budgeter using the character heuristic.
    pub fn heuristic(budget: PromptBudget) -> Self {
        Self::new(Arc::new(HeuristicTokenizer), budget)
    }

    pub fn budget(&self) -> PromptBudget {
        self.budget
    }

    pub fn build(&self, input: &PromptInput<'_>) -> BuiltPrompt {
        let max_tokens = self.budget.max_tokens;

        let fixed_tokens: usize = input
            .fields
            .iter()
            .map(|(_, value)| self.tokenizer.count(value))
            .sum();
        let available = max_tokens
            .saturating_sub(self.budget.reservation_tokens)
            .saturating_sub(fixed_tokens);
        if self.budget.reservation_tokens + fixed_tokens > max_tokens {
            warn!(
                fixed_tokens,
                reservation = self.budget.reservation_tokens,
                max_tokens,
                "Fixed fields alone exceed the prompt budget"
            );
        }

        let history_budget =
            (available as f64 * self.budget.history_fraction.clamp(0.0, 1.0)).floor() as usize;
        let (history_text, history) = match input.history {
            Some(turns) => self.fit_history(turns, history_budget),
            None => (String::new(), BlockStats::default()),
        };

        let context_budget = available.saturating_sub(history.tokens);
        let (context_text, context) = match input.context {
            Some(units) => self.fit_context(units, context_budget),
            None => (String::new(), BlockStats::default()),
        };

        let mut values: HashMap<&str, &str> = input
            .fields
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();
        if input.history.is_some() {
            values.insert(HISTORY_FIELD, &history_text);
        }
        if input.context.is_some() {
            values.insert(CONTEXT_FIELD, &context_text);
        }

        let mut text = template::render(input.template, &values);
        let mut tokens = self.tokenizer.count(&text);
        let mut hard_truncated = false;

        if tokens > max_tokens {
            warn!(
                tokens,
                max_tokens, "Prompt exceeded budget after assembly and was hard-truncated"
            );
            text = self.fit_tokens(&text, max_tokens);
            tokens = self.tokenizer.count(&text);
            hard_truncated = true;
        }

        debug!(
            tokens,
            available,
            history_turns = history.units_included,
            context_units = context.units_included,
            "Prompt assembled"
        );

        BuiltPrompt {
            text,
            tokens,
            fixed_tokens,
            available,
            history,
            context,
            hard_truncated,
        }
    }

    /// Keep the longest suffix of `turns` that fits `budget`.
    fn fit_history(&self, turns: &[ConversationTurn], budget: usize) -> (String, BlockStats) {
        let mut stats = BlockStats {
            budget,
            units_total: turns.len(),
            ..BlockStats::default()
        };

        if turns.is_empty() {
            let text = EMPTY_HISTORY_PLACEHOLDER.to_string();
            stats.tokens = self.tokenizer.count(&text);
            return (text, stats);
        }

        for start in 0..turns.len() {
            let text = format_turns(&turns[start..]);
            let tokens = self.tokenizer.count(&text);
            if tokens <= budget {
                if start > 0 {
                    debug!(dropped = start, kept = turns.len() - start, "Dropped oldest history turns");
                }
                stats.tokens = tokens;
                stats.units_included = turns.len() - start;
                return (text, stats);
            }
        }

        warn!(budget, "Latest turn alone exceeds the history budget, using placeholder");
        let text = HISTORY_TOO_LONG_PLACEHOLDER.to_string();
        stats.tokens = self.tokenizer.count(&text);
        stats.truncated = true;
        (text, stats)
    }

    /// Keep the longest prefix of `units` that fits `budget`, cutting a lone
    /// unit at the token level if it must.
    fn fit_context(&self, units: &[String], budget: usize) -> (String, BlockStats) {
        let mut stats = BlockStats {
            budget,
            units_total: units.len(),
            ..BlockStats::default()
        };

        for keep in (1..=units.len()).rev() {
            let text = units[..keep].join(CONTEXT_SEPARATOR);
            let tokens = self.tokenizer.count(&text);
            if tokens <= budget {
                if keep < units.len() {
                    debug!(dropped = units.len() - keep, kept = keep, "Dropped least relevant context units");
                }
                stats.tokens = tokens;
                stats.units_included = keep;
                return (text, stats);
            }
        }

        let Some(first) = units.first() else {
            return (String::new(), stats);
        };

        warn!(budget, "Top context unit exceeds the remaining budget, truncating it");
        let text = self.fit_tokens(first, budget);
        stats.tokens = self.tokenizer.count(&text);
        stats.units_included = usize::from(!text.is_empty());
        stats.truncated = true;
        (text, stats)
    }

    /// Truncate `text` until it measures at most `max_tokens`.
    ///
    /// Detokenizing a cut can re-tokenize longer than the cut, so this
    /// re-measures and tightens until it holds.
    fn fit_tokens(&self, text: &str, max_tokens: usize) -> String {
        let mut limit = max_tokens;
        loop {
            let cut = self.tokenizer.truncate(text, limit);
            let tokens = self.tokenizer.count(&cut);
            if tokens <= max_tokens {
                return cut;
            }
            if limit == 0 {
                return String::new();
            }
            limit = limit.saturating_sub((tokens - max_tokens).max(1));
        }
    }
}
