//! Filesystem side of vault-sort: the vault layout, path confinement, name
//! normalization, bounded snapshots and the three tools the oracle may call.

pub mod classify;
pub mod dispatcher;
pub mod error;
pub mod execution_context;
pub mod fs_ops;
pub mod registry;
pub mod sandbox;
pub mod snapshot;
pub mod tools;
pub mod vault;

pub use classify::MediaGroup;
pub use dispatcher::ToolDispatcherImpl;
pub use error::ToolError;
pub use execution_context::ExecutionContext;
pub use registry::ToolRegistryImpl;
pub use snapshot::{Observation, SnapshotBuilder, SnapshotLimits, TextExtractor, TreeNode};
pub use tools::{ListDirOutput, MoveRecord, MoveRequest, Tool, ToolResult};
pub use vault::{DestinationRoot, VaultLayout};
