pub mod base;
pub mod inspect_file;
pub mod list_dir;
pub mod plan_move;

pub use base::{Tool, ToolResult};
pub use inspect_file::InspectFileTool;
pub use list_dir::{ListDirOutput, ListDirTool};
pub use plan_move::{MoveRecord, MoveRequest, PlanMoveTool};
