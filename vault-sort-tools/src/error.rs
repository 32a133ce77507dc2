use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("Source no longer exists: {}", .0.display())]
    SourceVanished(PathBuf),

    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Internal error")]
    Internal,
}

impl ToolError {
    /// Maps an io error onto the tool taxonomy, keeping permission failures distinct.
    pub fn from_io(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => {
                ToolError::PermissionDenied(format!("{}: {}", context, err))
            }
            _ => ToolError::ExecutionFailed(format!("{}: {}", context, err)),
        }
    }

    /// Short machine-friendly label used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::ValidationError(_) => "validation",
            ToolError::SandboxViolation(_) => "sandbox_violation",
            ToolError::SourceVanished(_) => "source_vanished",
            ToolError::DestinationUnavailable(_) => "destination_unavailable",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::ExecutionFailed(_) => "execution_failed",
            ToolError::Timeout => "timeout",
            ToolError::Internal => "internal",
        }
    }
}
