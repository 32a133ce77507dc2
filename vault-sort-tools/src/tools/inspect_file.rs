use crate::error::ToolError;
use crate::execution_context::ExecutionContext;
use crate::sandbox::PathGuard;
use crate::snapshot::SnapshotBuilder;
use crate::tools::base::{Tool, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
struct InspectFileInput {
    path: String,
}

#[derive(Clone)]
pub struct InspectFileTool {
    guard: PathGuard,
    builder: Arc<SnapshotBuilder>,
}

impl InspectFileTool {
    pub fn new(guard: PathGuard, builder: Arc<SnapshotBuilder>) -> Self {
        Self { guard, builder }
    }
}

#[async_trait]
impl Tool for InspectFileTool {
    fn name(&self) -> &'static str {
        "inspect_file"
    }

    fn description(&self) -> &'static str {
        "Returns the bounded observation of a single file"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"}
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _ctx: ExecutionContext,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let input: InspectFileInput =
            serde_json::from_value(input).map_err(|e| ToolError::ValidationError(e.to_string()))?;

        let file = self.guard.validate(&input.path)?;
        if !file.is_file() {
            return Err(ToolError::ValidationError(format!(
                "Not a regular file: {}",
                input.path
            )));
        }

        let builder = self.builder.clone();
        let observation = tokio::task::spawn_blocking(move || builder.observe(&file))
            .await
            .map_err(|_| ToolError::Internal)?;

        let value = serde_json::to_value(&observation)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolResult::ok(value))
    }
}
