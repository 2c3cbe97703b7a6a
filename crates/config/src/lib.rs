//! Configuration loading, validation, and management for ragstream.
//!
//! Loads configuration from `~/.ragstream/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ragstream/config.toml`. Every section and field has a
/// default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding endpoint and prefixes
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Fusion retriever
    #[serde(default)]
    pub retriever: RetrieverConfig,

    /// Prompt budgeting
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Tool-call engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// Conversation history window
    #[serde(default)]
    pub conversation: ConversationConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── Model endpoint ──────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per model response
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,

    /// Hard ceiling on prompt size, in tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_response_tokens() -> u32 {
    1024
}
fn default_max_context_tokens() -> usize {
    32_000
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_response_tokens: default_max_response_tokens(),
            max_context_tokens: default_max_context_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("max_context_tokens", &self.max_context_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Exponential backoff for transient model-endpoint failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

// ── Embeddings ──────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Falls back to `llm.base_url` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Falls back to `llm.api_key` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,

    #[serde(default = "default_passage_prefix")]
    pub passage_prefix: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_batch_size() -> usize {
    8
}
fn default_query_prefix() -> String {
    "task: search result | query: ".into()
}
fn default_passage_prefix() -> String {
    "title: none | text: ".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            query_prefix: default_query_prefix(),
            passage_prefix: default_passage_prefix(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("query_prefix", &self.query_prefix)
            .field("passage_prefix", &self.passage_prefix)
            .finish()
    }
}

// ── Retriever ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// Collection names to fuse over
    #[serde(default)]
    pub collections: Vec<String>,

    /// Neighbours requested per collection
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_max_passages")]
    pub max_passages_to_select: usize,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Metadata key under which collections store the passage id
    #[serde(default = "default_passage_id_meta_key")]
    pub passage_id_meta_key: String,

    /// Per-collection search timeout; a timed-out collection contributes nothing
    #[serde(default = "default_collection_timeout_secs")]
    pub collection_timeout_secs: u64,

    #[serde(default = "default_chroma_url")]
    pub chroma_url: String,

    /// SQLite passage store
    #[serde(default = "default_passage_db")]
    pub passage_db: PathBuf,
}

fn default_top_k() -> usize {
    10
}
fn default_max_passages() -> usize {
    3
}
fn default_rrf_k() -> u32 {
    60
}
fn default_passage_id_meta_key() -> String {
    "passage_id".into()
}
fn default_collection_timeout_secs() -> u64 {
    10
}
fn default_chroma_url() -> String {
    "http://localhost:8000".into()
}
fn default_passage_db() -> PathBuf {
    AppConfig::config_dir().join("passages.db")
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            top_k: default_top_k(),
            max_passages_to_select: default_max_passages(),
            rrf_k: default_rrf_k(),
            passage_id_meta_key: default_passage_id_meta_key(),
            collection_timeout_secs: default_collection_timeout_secs(),
            chroma_url: default_chroma_url(),
            passage_db: default_passage_db(),
        }
    }
}

// ── Prompt ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Tokens held back for the model's answer
    #[serde(default = "default_reservation_tokens")]
    pub reservation_tokens: usize,

    /// Share of the remaining budget given to conversation history
    #[serde(default = "default_history_fraction")]
    pub history_fraction: f64,

    /// Prompt template file; the built-in template is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,

    /// Path to a HuggingFace `tokenizer.json` for exact counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<PathBuf>,
}

fn default_reservation_tokens() -> usize {
    2048
}
fn default_history_fraction() -> f64 {
    0.5
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            reservation_tokens: default_reservation_tokens(),
            history_fraction: default_history_fraction(),
            template_path: None,
            tokenizer_path: None,
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// What happens to assistant text produced in a round that also calls tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPolicy {
    /// Forward every text delta as it arrives.
    #[default]
    Stream,
    /// Hold a round's text until end-of-turn; drop it if the round called tools.
    Buffer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model rounds per turn before the fallback message is sent
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Capacity of the caller-facing event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Tool error strings are cut to this many characters
    #[serde(default = "default_tool_error_max_chars")]
    pub tool_error_max_chars: usize,

    #[serde(default)]
    pub text_policy: TextPolicy,

    /// Tools that receive caller-side session context
    #[serde(default)]
    pub context_tools: Vec<String>,

    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    /// What the caller is told when a turn fails
    #[serde(default)]
    pub error_messages: ErrorMessages,
}

/// User-facing text for turn-level failures. Upstream error detail only goes
/// to the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessages {
    #[serde(default = "default_context_window_message")]
    pub context_window: String,

    #[serde(default = "default_network_message")]
    pub network: String,

    /// The model endpoint refused the request (bad key, bad request)
    #[serde(default = "default_rejected_message")]
    pub rejected: String,
}

fn default_context_window_message() -> String {
    "This conversation is too long for the model to handle. Please start a new conversation or ask a shorter question."
        .into()
}
fn default_network_message() -> String {
    "The language model is temporarily unreachable. Please try again in a moment.".into()
}
fn default_rejected_message() -> String {
    "The language model rejected the request. Please check the service configuration.".into()
}

impl Default for ErrorMessages {
    fn default() -> Self {
        Self {
            context_window: default_context_window_message(),
            network: default_network_message(),
            rejected: default_rejected_message(),
        }
    }
}

fn default_max_iterations() -> usize {
    5
}
fn default_event_buffer() -> usize {
    64
}
fn default_tool_error_max_chars() -> usize {
    512
}
fn default_fallback_message() -> String {
    "I'm sorry, I wasn't able to finish working on that request. Please try rephrasing or narrowing the question."
        .into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            event_buffer: default_event_buffer(),
            tool_error_max_chars: default_tool_error_max_chars(),
            text_policy: TextPolicy::default(),
            context_tools: Vec::new(),
            fallback_message: default_fallback_message(),
            error_messages: ErrorMessages::default(),
        }
    }
}

// ── Conversation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Turns kept per session
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_history_window() -> usize {
    10
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.ragstream/config.toml).
    ///
    /// Environment variables override the file:
    /// - `RAGSTREAM_API_KEY`, then `OPENAI_API_KEY` (only when no key is configured)
    /// - `RAGSTREAM_BASE_URL`
    /// - `RAGSTREAM_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_dir().join("config.toml"))
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("RAGSTREAM_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(url) = lookup("RAGSTREAM_BASE_URL") {
            self.llm.base_url = url;
        }

        if let Some(model) = lookup("RAGSTREAM_MODEL") {
            self.llm.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragstream")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.prompt.reservation_tokens >= self.llm.max_context_tokens {
            return Err(ConfigError::ValidationError(
                "prompt.reservation_tokens must be smaller than llm.max_context_tokens".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.prompt.history_fraction) {
            return Err(ConfigError::ValidationError(
                "prompt.history_fraction must be between 0.0 and 1.0".into(),
            ));
        }

        if self.retriever.rrf_k == 0 {
            return Err(ConfigError::ValidationError(
                "retriever.rrf_k must be > 0".into(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be >= 1".into(),
            ));
        }

        if self.engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_iterations must be >= 1".into(),
            ));
        }

        if self.engine.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "engine.event_buffer must be >= 1".into(),
            ));
        }

        if self.llm.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "llm.retry.multiplier must be >= 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Generate a default config TOML string (for `ragstream config`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
