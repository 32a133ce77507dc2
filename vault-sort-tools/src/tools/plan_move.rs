use crate::error::ToolError;
use crate::execution_context::ExecutionContext;
use crate::fs_ops::{move_exact, move_no_clobber};
use crate::sandbox::naming::{
    candidate_name, first_free_name, normalize_file_name, DEFAULT_MAX_NAME_LEN,
};
use crate::sandbox::{sanitize_segment, PathGuard};
use crate::tools::base::{Tool, ToolResult};
use crate::vault::{DestinationRoot, VaultLayout};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Input of `plan_move`, produced by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub source: PathBuf,
    pub destination_root: DestinationRoot,
    #[serde(default)]
    pub segments: Vec<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub breadcrumb: PathBuf,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_dirs: Vec<PathBuf>,
}

#[derive(Clone)]
pub struct PlanMoveTool {
    layout: VaultLayout,
    guard: PathGuard,
}

impl PlanMoveTool {
    pub fn new(layout: VaultLayout) -> Result<Self, ToolError> {
        let guard = PathGuard::new(layout.root())?;
        Ok(Self { layout, guard })
    }

    /// Runs the whole move transaction synchronously.
    pub fn perform(
        &self,
        request: &MoveRequest,
        date: NaiveDate,
        dry_run: bool,
    ) -> Result<MoveRecord, ToolError> {
        let source = match self.guard.validate(&request.source) {
            Ok(path) => path,
            Err(_) if fs::symlink_metadata(&request.source).is_err() => {
                return Err(ToolError::SourceVanished(request.source.clone()))
            }
            Err(e) => return Err(e),
        };
        if !self.layout.is_in_inbox(&source) || self.layout.is_in_moved_today(&source) {
            return Err(ToolError::SandboxViolation(format!(
                "Source outside the inbox: {}",
                source.display()
            )));
        }

        let dest_dir = request
            .segments
            .iter()
            .map(|s| sanitize_segment(s))
            .fold(self.layout.root_dir(request.destination_root), |acc, s| {
                acc.join(s)
            });
        let dest_dir = self.guard.validate_new(&dest_dir)?;
        let file_name = normalize_file_name(&request.file_name, DEFAULT_MAX_NAME_LEN);
        let crumb_dir = self.layout.breadcrumb_dir(date);

        if dry_run {
            return Ok(self.preview(source, &dest_dir, &file_name, &crumb_dir));
        }

        let mut created: Vec<PathBuf> = Vec::new();
        let root_dir = self.layout.root_dir(request.destination_root);
        if let Err(e) = create_dirs_tracked(&root_dir, &dest_dir, &mut created)
            .and_then(|_| create_dirs_tracked(self.layout.moved_today(), &crumb_dir, &mut created))
        {
            rollback_dirs(&created);
            return Err(e);
        }

        let destination = match move_no_clobber(&source, &dest_dir, &file_name) {
            Ok(path) => path,
            Err(e) => {
                rollback_dirs(&created);
                return Err(e);
            }
        };

        match write_breadcrumb(&crumb_dir, &destination) {
            Ok(breadcrumb) => {
                info!(
                    "Moved {} -> {}",
                    self.layout.display(&source),
                    self.layout.display(&destination)
                );
                Ok(MoveRecord {
                    source,
                    destination,
                    breadcrumb,
                    dry_run: false,
                    created_dirs: created,
                })
            }
            Err(e) => {
                warn!("Breadcrumb failed, reverting move: {}", e);
                if let Err(revert) = move_exact(&destination, &source) {
                    error!(
                        "Could not revert {} to {}: {}",
                        destination.display(),
                        source.display(),
                        revert
                    );
                }
                rollback_dirs(&created);
                Err(e)
            }
        }
    }

    fn preview(
        &self,
        source: PathBuf,
        dest_dir: &Path,
        file_name: &str,
        crumb_dir: &Path,
    ) -> MoveRecord {
        let final_name = first_free_name(dest_dir, file_name).unwrap_or_else(|_| file_name.to_string());
        let crumb_name = first_free_name(crumb_dir, &final_name).unwrap_or_else(|_| final_name.clone());
        info!(
            "[dry-run] Would move {} -> {}",
            self.layout.display(&source),
            self.layout.display(&dest_dir.join(&final_name))
        );
        MoveRecord {
            source,
            destination: dest_dir.join(&final_name),
            breadcrumb: crumb_dir.join(crumb_name),
            dry_run: true,
            created_dirs: Vec::new(),
        }
    }
}

/// Creates every missing directory between `base` and `target`, recording what it made.
fn create_dirs_tracked(
    base: &Path,
    target: &Path,
    created: &mut Vec<PathBuf>,
) -> Result<(), ToolError> {
    let relative = target.strip_prefix(base).map_err(|_| {
        ToolError::SandboxViolation(format!("{} is not under {}", target.display(), base.display()))
    })?;

    if !base.is_dir() {
        fs::create_dir_all(base).map_err(|e| ToolError::from_io("create destination root", e))?;
    }

    let mut current = base.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::create_dir(&current) {
            Ok(()) => created.push(current.clone()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !current.is_dir() {
                    return Err(ToolError::DestinationUnavailable(format!(
                        "Not a directory: {}",
                        current.display()
                    )));
                }
            }
            Err(e) => return Err(ToolError::from_io("create destination", e)),
        }
    }
    Ok(())
}

fn rollback_dirs(created: &[PathBuf]) {
    for dir in created.iter().rev() {
        if let Err(e) = fs::remove_dir(dir) {
            warn!("Could not remove {} during rollback: {}", dir.display(), e);
        }
    }
}

/// Leaves a pointer to `destination` in the dated breadcrumb folder.
fn write_breadcrumb(crumb_dir: &Path, destination: &Path) -> Result<PathBuf, ToolError> {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    for attempt in 0..1000 {
        let crumb = crumb_dir.join(candidate_name(&name, attempt));
        match link(destination, &crumb) {
            Ok(()) => return Ok(crumb),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ToolError::from_io("breadcrumb", e)),
        }
    }
    Err(ToolError::DestinationUnavailable(format!(
        "No free breadcrumb name for {}",
        name
    )))
}

#[cfg(unix)]
fn link(destination: &Path, crumb: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(destination, crumb)
}

#[cfg(not(unix))]
fn link(destination: &Path, crumb: &Path) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(crumb)?;
    writeln!(file, "{}", destination.display())?;
    file.sync_all()
}

#[async_trait]
impl Tool for PlanMoveTool {
    fn name(&self) -> &'static str {
        "plan_move"
    }

    fn description(&self) -> &'static str {
        "Moves an inbox item to a destination folder and leaves a breadcrumb"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "source": {"type": "string"},
                "destination_root": {"type": "string", "enum": ["Documents", "Media", "Projects"]},
                "segments": {"type": "array", "items": {"type": "string"}},
                "file_name": {"type": "string"}
            },
            "required": ["source", "destination_root", "file_name"]
        })
    }

    fn is_mutating(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: ExecutionContext,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let request: MoveRequest =
            serde_json::from_value(input).map_err(|e| ToolError::ValidationError(e.to_string()))?;

        let tool = self.clone();
        let record = tokio::task::spawn_blocking(move || {
            tool.perform(&request, ctx.date, ctx.dry_run)
        })
        .await
        .map_err(|_| ToolError::Internal)??;

        let value =
            serde_json::to_value(&record).map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolResult::ok(value))
    }
}
