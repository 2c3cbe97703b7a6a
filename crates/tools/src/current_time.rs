//! Current date and time.

use async_trait::async_trait;
use ragstream_core::error::ToolError;
use ragstream_core::tool::{Tool, ToolResult};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let now = chrono::Local::now();
        Ok(ToolResult::ok(now.format(TIME_FORMAT).to_string())
            .with_data(serde_json::json!({ "rfc3339": now.to_rfc3339() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn formats_local_time() {
        let result = CurrentTimeTool
            .execute(serde_json::json!({}))
            .await
            .unwrap();

        assert!(result.success);
        assert!(chrono::NaiveDateTime::parse_from_str(&result.output, TIME_FORMAT).is_ok());
        assert_eq!(result.output.len(), "2025-01-31 09:05:00".len());
    }

    #[tokio::test]
    async fn ignores_arguments() {
        let result = CurrentTimeTool
            .execute(serde_json::json!({"unexpected": true}))
            .await
            .unwrap();
        assert!(result.success);
    }

    #[test]
    fn schema_takes_no_parameters() {
        let def = CurrentTimeTool.to_definition();
        assert_eq!(def.name, "get_current_time");
        assert!(def.parameters["properties"].as_object().unwrap().is_empty());
    }
}
