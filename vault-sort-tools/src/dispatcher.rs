use crate::error::ToolError;
use crate::execution_context::ExecutionContext;
use crate::registry::ToolRegistryImpl;
use crate::tools::{Tool, ToolResult};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

const MAX_INPUT_BYTES: usize = 64 * 1024;

pub struct ToolDispatcherImpl {
    registry: Arc<ToolRegistryImpl>,
}

impl ToolDispatcherImpl {
    pub fn new(registry: Arc<ToolRegistryImpl>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(
        &self,
        ctx: ExecutionContext,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        debug!("Dispatching tool: {} at step {}", tool_name, ctx.step);

        // 1. Lookup tool
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::ValidationError(format!("Tool not found: {}", tool_name)))?;

        // 2. Reject malformed payloads before they reach the filesystem
        if !self.validate_input(&input) {
            return Err(ToolError::ValidationError("Input rejected".into()));
        }

        self.execute_with_protection(tool, ctx, input).await
    }

    fn validate_input(&self, input: &serde_json::Value) -> bool {
        if !input.is_object() {
            return false;
        }
        match serde_json::to_string(input) {
            Ok(serialized) => serialized.len() <= MAX_INPUT_BYTES,
            Err(_) => false,
        }
    }

    async fn execute_with_protection(
        &self,
        tool: Arc<dyn Tool>,
        ctx: ExecutionContext,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let timeout_ms = ctx.timeout_ms;
        let mutating = tool.is_mutating();

        // Spawn task to isolate panics
        let handle = tokio::spawn(async move { tool.execute(ctx, input).await });

        let joined = if mutating {
            // A move is never abandoned half way
            handle.await
        } else {
            match timeout(Duration::from_millis(timeout_ms), handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Tool execution timed out after {}ms", timeout_ms);
                    return Err(ToolError::Timeout);
                }
            }
        };

        match joined {
            Ok(result) => result,
            Err(join_err) => {
                if join_err.is_panic() {
                    error!("Tool execution panicked");
                } else {
                    error!("Tool execution cancelled");
                }
                Err(ToolError::Internal)
            }
        }
    }
}
