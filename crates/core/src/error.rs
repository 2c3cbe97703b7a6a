//! Error types for the ragstream domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`ErrorKind`] is the
//! flat taxonomy that crosses the streaming boundary to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all ragstream operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy surfaced on the caller-facing event stream.
///
/// Model-endpoint failures terminate a turn: `NetworkTransient` after
/// retries are exhausted, `ContextWindowExceeded`, and `ProviderRejected`
/// for requests the endpoint refuses outright (bad key, bad request).
/// Every other kind is recovered locally and shows up in logs or inside a
/// tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkTransient,
    ContextWindowExceeded,
    ProviderRejected,
    ToolNotFound,
    MalformedToolArguments,
    ToolExecutionError,
    IterationCapExceeded,
    CollectionUnavailable,
    HydrationMiss,
}

impl ErrorKind {
    /// Whether an error of this kind ends the turn.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NetworkTransient | Self::ContextWindowExceeded | Self::ProviderRejected
        )
    }

    /// Whether repeating the same request later could succeed.
    pub fn is_retryable(self) -> bool {
        self == Self::NetworkTransient
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NetworkTransient => "network_transient",
            Self::ContextWindowExceeded => "context_window_exceeded",
            Self::ProviderRejected => "provider_rejected",
            Self::ToolNotFound => "tool_not_found",
            Self::MalformedToolArguments => "malformed_tool_arguments",
            Self::ToolExecutionError => "tool_execution_error",
            Self::IterationCapExceeded => "iteration_cap_exceeded",
            Self::CollectionUnavailable => "collection_unavailable",
            Self::HydrationMiss => "hydration_miss",
        };
        f.write_str(s)
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Prompt exceeds the model context window: {0}")]
    ContextWindowExceeded(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Transient failures are worth retrying with backoff.
    ///
    /// Server-side 5xx responses count as transient; 4xx responses other
    /// than rate limiting do not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::StreamInterrupted(_) => true,
            Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_)
            | Self::ContextWindowExceeded(_)
            | Self::NotConfigured(_) => false,
        }
    }

    /// Map onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextWindowExceeded(_) => ErrorKind::ContextWindowExceeded,
            e if e.is_transient() => ErrorKind::NetworkTransient,
            _ => ErrorKind::ProviderRejected,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Collection '{collection}' unavailable: {reason}")]
    CollectionUnavailable { collection: String, reason: String },

    #[error("Passage store error: {0}")]
    Store(String),

    #[error("Invalid retrieval configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::ToolNotFound,
            _ => ErrorKind::ToolExecutionError,
        }
    }
}
