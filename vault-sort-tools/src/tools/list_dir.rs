use crate::error::ToolError;
use crate::execution_context::ExecutionContext;
use crate::sandbox::PathGuard;
use crate::snapshot::{Observation, SnapshotBuilder};
use crate::tools::base::{Tool, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Deserialize)]
struct ListDirInput {
    path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDirOutput {
    pub observation: Observation,
    /// Absolute paths of visible, non-symlink children in listing order.
    pub entries: Vec<PathBuf>,
    pub truncated: bool,
}

#[derive(Clone)]
pub struct ListDirTool {
    guard: PathGuard,
    builder: Arc<SnapshotBuilder>,
}

impl ListDirTool {
    pub fn new(guard: PathGuard, builder: Arc<SnapshotBuilder>) -> Self {
        Self { guard, builder }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn description(&self) -> &'static str {
        "Lists a directory inside the vault, bounded and sorted"
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
        let input: ListDirInput =
            serde_json::from_value(input).map_err(|e| ToolError::ValidationError(e.to_string()))?;

        let dir = self.guard.validate(&input.path)?;
        if !dir.is_dir() {
            return Err(ToolError::ValidationError(format!(
                "Not a directory: {}",
                input.path
            )));
        }

        let builder = self.builder.clone();
        let output = tokio::task::spawn_blocking(move || {
            let observation = builder.observe(&dir);
            builder
                .visible_children(&dir)
                .map(|(entries, truncated)| ListDirOutput {
                    observation,
                    entries,
                    truncated,
                })
        })
        .await
        .map_err(|_| ToolError::Internal)?
        .map_err(|e| ToolError::from_io("list_dir", e))?;

        let value =
            serde_json::to_value(&output).map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolResult::ok(value))
    }
}
