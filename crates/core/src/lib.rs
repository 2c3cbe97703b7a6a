//! # ragstream core
//!
//! Domain types, collaborator traits, and error definitions for the ragstream
//! orchestration core. Nothing in here talks to the network; the other crates
//! implement these traits.
//!
//! ## Layout
//!
//! - [`provider`]: the model endpoint contract and its streamed delta shape
//! - [`retrieval`]: embedding, vector-search, and passage-store contracts
//! - [`tool`]: the tool contract and the name-keyed registry
//! - [`event`]: an optional broadcast bus for observing turns

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, ProviderError, Result, RetrievalError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    ChunkReceiver, EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse,
    StreamChunk, ToolCallDelta, ToolDefinition, Usage,
};
pub use retrieval::{
    Embedder, EmbeddingTask, MetadataFilter, Passage, PassageId, PassageStore, RankedHit,
    VectorCollection,
};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
