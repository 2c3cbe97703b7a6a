//! Token counting.
//!
//! The budgeter only needs two operations: count the tokens of a string and
//! cut a string down to at most N tokens. [`HeuristicTokenizer`] estimates
//! ~4 characters per token, which is within ~10% for BPE tokenizers on
//! English text. With the `hf-tokenizer` feature, [`HfTokenizer`] loads a
//! HuggingFace `tokenizer.json` for exact counts.

/// Counts and truncates text in model tokens.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;

    /// A prefix of `text` holding at most `max_tokens` tokens.
    ///
    /// Implementations should satisfy `count(truncate(t, n)) <= n`; the
    /// budgeter re-measures anyway and shrinks further if they don't.
    fn truncate(&self, text: &str, max_tokens: usize) -> String;
}

/// Character-based estimate: one token per 4 characters, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

const CHARS_PER_TOKEN: usize = 4;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => text[..byte_idx].to_string(),
            None => text.to_string(),
        }
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use super::{HeuristicTokenizer, Tokenizer};
    use ragstream_core::Error;
    use std::path::Path;
    use tracing::{info, warn};

    /// Exact token counts from a HuggingFace `tokenizer.json`.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
            let path = path.as_ref();
            let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| Error::Config {
                message: format!("Failed to load tokenizer from {}: {e}", path.display()),
            })?;
            info!(path = %path.display(), "Loaded tokenizer");
            Ok(Self { inner })
        }

        fn ids(&self, text: &str) -> Option<Vec<u32>> {
            match self.inner.encode(text, false) {
                Ok(encoding) => Some(encoding.get_ids().to_vec()),
                Err(e) => {
                    warn!(error = %e, "Tokenization failed, falling back to estimate");
                    None
                }
            }
        }
    }

    impl Tokenizer for HfTokenizer {
        fn count(&self, text: &str) -> usize {
            if text.is_empty() {
                return 0;
            }
            match self.ids(text) {
                Some(ids) => ids.len(),
                None => HeuristicTokenizer.count(text),
            }
        }

        fn truncate(&self, text: &str, max_tokens: usize) -> String {
            let Some(ids) = self.ids(text) else {
                return HeuristicTokenizer.truncate(text, max_tokens);
            };
            if ids.len() <= max_tokens {
                return text.to_string();
            }
            self.inner
                .decode(&ids[..max_tokens], true)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Detokenization failed, falling back to estimate");
                    HeuristicTokenizer.truncate(text, max_tokens)
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(HeuristicTokenizer.count(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(HeuristicTokenizer.count("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(HeuristicTokenizer.count("hello"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 4 Bengali characters, 12 bytes
        assert_eq!(HeuristicTokenizer.count("আমার"), 1);
    }

    #[test]
    fn truncate_respects_limit() {
        let text = "a".repeat(100);
        let cut = HeuristicTokenizer.truncate(&text, 10);
        assert_eq!(cut.len(), 40);
        assert_eq!(HeuristicTokenizer.count(&cut), 10);
        assert_eq!(HeuristicTokenizer.truncate(&text, 0), "");
    }

    #[test]
    fn truncate_is_char_safe() {
        let text = "ঢাকা শহর".repeat(10);
        let cut = HeuristicTokenizer.truncate(&text, 3);
        assert_eq!(cut.chars().count(), 12);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn truncate_short_text_is_identity() {
        assert_eq!(HeuristicTokenizer.truncate("short", 100), "short");
    }
}
