//! Built-in tool implementations for ragstream.
//!
//! - `retrieve_knowledge`: runs the fusion retriever for a model-chosen query
//! - `get_current_time`: the server's local date and time

pub mod current_time;
pub mod retrieve_knowledge;

use ragstream_core::tool::ToolRegistry;
use ragstream_retrieval::{FusionQuery, FusionRetriever};
use std::sync::Arc;

pub use current_time::CurrentTimeTool;
pub use retrieve_knowledge::RetrieveKnowledgeTool;

/// Create a registry with every built-in tool.
///
/// `query_template` supplies the fusion parameters; the model only chooses
/// the query text.
pub fn default_registry(retriever: Arc<FusionRetriever>, query_template: FusionQuery) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(CurrentTimeTool))
        .with(Arc::new(RetrieveKnowledgeTool::new(retriever, query_template)))
}
