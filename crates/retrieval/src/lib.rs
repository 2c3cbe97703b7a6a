//! Fusion retrieval for ragstream.
//!
//! Queries several vector collections concurrently, merges their rankings with
//! Reciprocal Rank Fusion, and hydrates the winners from a passage store.
//!
//! Collaborators:
//! - [`ProviderEmbedder`]: query/passage embeddings through any provider
//! - [`ChromaCollection`]: Chroma-compatible HTTP collection
//! - [`InMemoryCollection`] / [`InMemoryPassageStore`]: tests and demos
//! - [`SqlitePassageStore`]: durable text store (feature `sqlite`)

pub mod chroma;
pub mod embedder;
pub mod fusion;
pub mod in_memory;
pub mod retriever;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use chroma::ChromaCollection;
pub use embedder::ProviderEmbedder;
pub use fusion::{FusedHit, reciprocal_rank_fusion};
pub use in_memory::{InMemoryCollection, InMemoryPassageStore, cosine_similarity};
pub use retriever::{FusionOutcome, FusionQuery, FusionRetriever};
#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePassageStore;
