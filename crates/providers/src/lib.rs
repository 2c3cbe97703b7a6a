//! Model endpoint implementations for ragstream.
//!
//! All providers implement the `ragstream_core::Provider` trait.
//! [`RetryingProvider`] wraps any of them with bounded exponential backoff.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryingProvider};
