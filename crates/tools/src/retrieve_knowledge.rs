//! Knowledge retrieval tool.
//!
//! Lets the model re-run fusion retrieval mid-turn with a query of its own.
//! Passages come back as a JSON array in fused-rank order.

use async_trait::async_trait;
use ragstream_core::error::ToolError;
use ragstream_core::retrieval::Passage;
use ragstream_core::tool::{Tool, ToolResult};
use ragstream_retrieval::{FusionQuery, FusionRetriever};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

pub struct RetrieveKnowledgeTool {
    retriever: Arc<FusionRetriever>,
    template: FusionQuery,
}

impl RetrieveKnowledgeTool {
    /// `template` carries every fusion parameter except the query text.
    pub fn new(retriever: Arc<FusionRetriever>, template: FusionQuery) -> Self {
        Self {
            retriever,
            template,
        }
    }
}

#[derive(Serialize)]
struct PassageView<'a> {
    passage_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: &'a serde_json::Map<String, serde_json::Value>,
}

impl<'a> From<&'a Passage> for PassageView<'a> {
    fn from(p: &'a Passage) -> Self {
        Self {
            passage_id: p.id.as_str(),
            text: &p.text,
            metadata: &p.metadata,
        }
    }
}

#[async_trait]
impl Tool for RetrieveKnowledgeTool {
    fn name(&self) -> &str {
        "retrieve_knowledge"
    }

    fn description(&self) -> &str {
        "Retrieve relevant passages from the knowledge base based on a query."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search the knowledge base for"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let mut fusion = self.template.clone();
        fusion.text = query.to_string();

        let passages = self
            .retriever
            .fuse(&fusion)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        debug!(query, passages = passages.len(), "retrieve_knowledge complete");

        let views: Vec<PassageView<'_>> = passages.iter().map(PassageView::from).collect();
        let data = serde_json::to_value(&views).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().to_string(),
            reason: format!("Failed to serialize passages: {e}"),
        })?;
        let output = serde_json::to_string_pretty(&data).unwrap_or_else(|_| "[]".into());

        Ok(ToolResult::ok(output).with_data(data))
    }
}
