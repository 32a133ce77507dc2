//! Abstract interfaces for runtime dependencies.

use async_trait::async_trait;
use thiserror::Error;

/// Runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("LLM error: {0}")]
    LLMError(String),

    #[error("LLM request timed out")]
    LLMTimeout,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Tool error: {0}")]
    ToolError(#[from] vault_sort_tools::ToolError),

    #[error("Audit error: {0}")]
    AuditError(#[from] vault_sort::infra::AuditLoggerError),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// One text-completion request, already shaped for its attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub n_predict: u32,
    /// Empty means no stop sequences are sent.
    pub stop: Vec<String>,
}

/// Completion endpoint interface.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send one request and return the raw completion text.
    ///
    /// Timeouts must surface as [`RuntimeError::LLMTimeout`] so callers can
    /// tell them apart from an unreachable server.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RuntimeError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct EchoBackend;

    #[async_trait]
    impl LlmBackend for EchoBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, RuntimeError> {
            if request.prompt.is_empty() {
                return Err(RuntimeError::LLMTimeout);
            }
            Ok(request.prompt.clone())
        }
    }

    #[tokio::test]
    async fn test_backend_as_trait_object() {
        let backend: Arc<dyn LlmBackend> = Arc::new(EchoBackend);
        let request = CompletionRequest {
            prompt: "hello".into(),
            n_predict: 8,
            stop: Vec::new(),
        };
        assert_eq!(backend.complete(&request).await.unwrap(), "hello");

        let empty = CompletionRequest {
            prompt: String::new(),
            ..request
        };
        assert!(matches!(
            backend.complete(&empty).await,
            Err(RuntimeError::LLMTimeout)
        ));
    }

    #[test]
    fn test_tool_error_converts() {
        let err: RuntimeError = vault_sort_tools::ToolError::Timeout.into();
        assert!(err.to_string().contains("timed out"));
    }
}
