//! Checks an oracle [`Action`] against the run's rules and turns it into a
//! concrete, vault-confined operation. Nothing reaches a tool without
//! passing through here.

use crate::run_config::{DestinationPolicy, Taxonomy};
use crate::types::Action;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use vault_sort::infra::Stage;
use vault_sort_tools::sandbox::naming::{
    first_free_name, normalize_file_name, split_extension, truncate_preserving_extension,
    DEFAULT_MAX_NAME_LEN,
};
use vault_sort_tools::sandbox::{sanitize_segment, PathGuard};
use vault_sort_tools::{DestinationRoot, MoveRequest, ToolError, VaultLayout};

const DEFAULT_SUBFOLDER: &str = "Unsorted";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{tool} is not allowed in the {stage:?} stage")]
    WrongStage { tool: &'static str, stage: Stage },

    #[error("Path escapes the vault: {0}")]
    PathEscape(String),

    #[error("Path is outside the inbox: {0}")]
    OutsideInbox(String),

    #[error("Path does not exist: {0}")]
    Missing(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Destination not allowed: {0}")]
    DestinationNotAllowed(String),

    #[error("{0} requires a subfolder")]
    MissingSubfolder(DestinationRoot),

    #[error("{category} is not a {root} category")]
    UnknownCategory {
        root: DestinationRoot,
        category: String,
    },
}

impl ValidationError {
    /// Short label used in audit records.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::WrongStage { .. } => "wrong_stage",
            ValidationError::PathEscape(_) => "path_escape",
            ValidationError::OutsideInbox(_) => "outside_inbox",
            ValidationError::Missing(_) => "missing",
            ValidationError::NotADirectory(_) => "not_a_directory",
            ValidationError::NotAFile(_) => "not_a_file",
            ValidationError::DestinationNotAllowed(_) => "destination_not_allowed",
            ValidationError::MissingSubfolder(_) => "missing_subfolder",
            ValidationError::UnknownCategory { .. } => "unknown_category",
        }
    }
}

/// A move the validator accepted, with every path already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub source: PathBuf,
    pub destination_root: DestinationRoot,
    pub segments: Vec<String>,
    pub destination_dir: PathBuf,
    pub file_name: String,
    /// Where the item would land if nothing else is created there first.
    pub planned_destination: PathBuf,
    /// Normalizations applied to the raw action.
    pub notes: Vec<&'static str>,
}

impl MovePlan {
    pub fn to_request(&self) -> MoveRequest {
        MoveRequest {
            source: self.source.clone(),
            destination_root: self.destination_root,
            segments: self.segments.clone(),
            file_name: self.file_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedAction {
    ListDir(PathBuf),
    InspectFile(PathBuf),
    PlanMove(MovePlan),
}

pub struct ActionValidator {
    layout: VaultLayout,
    guard: PathGuard,
    policy: DestinationPolicy,
    taxonomy: Taxonomy,
    enforce_taxonomy: bool,
}

impl ActionValidator {
    pub fn new(
        layout: VaultLayout,
        policy: DestinationPolicy,
        taxonomy: Taxonomy,
        enforce_taxonomy: bool,
    ) -> Result<Self, ToolError> {
        let guard = PathGuard::new(layout.root())?;
        Ok(Self {
            layout,
            guard,
            policy,
            taxonomy,
            enforce_taxonomy,
        })
    }

    pub fn policy(&self) -> &DestinationPolicy {
        &self.policy
    }

    /// Validates `action` proposed for `target` while it sits in `stage`.
    pub fn validate(
        &self,
        action: &Action,
        target: &Path,
        stage: Stage,
    ) -> Result<ValidatedAction, ValidationError> {
        if stage == Stage::Decide && !action.is_move() {
            return Err(ValidationError::WrongStage {
                tool: action.tool_name(),
                stage,
            });
        }

        match action {
            Action::ListDir { path } => {
                let dir = self.resolve_in_inbox(path.as_deref(), target)?;
                if !dir.is_dir() {
                    return Err(ValidationError::NotADirectory(self.layout.display(&dir)));
                }
                Ok(ValidatedAction::ListDir(dir))
            }
            Action::InspectFile { path } => {
                let file = self.resolve_in_inbox(path.as_deref(), target)?;
                if !file.is_file() {
                    return Err(ValidationError::NotAFile(self.layout.display(&file)));
                }
                Ok(ValidatedAction::InspectFile(file))
            }
            Action::PlanMove {
                src,
                destination_root,
                subpath,
                filename,
            } => self
                .validate_move(
                    src.as_deref(),
                    destination_root,
                    subpath.as_deref(),
                    filename.as_deref(),
                    target,
                )
                .map(ValidatedAction::PlanMove),
        }
    }

    fn validate_move(
        &self,
        src: Option<&str>,
        raw_root: &str,
        subpath: Option<&str>,
        filename: Option<&str>,
        target: &Path,
    ) -> Result<MovePlan, ValidationError> {
        let mut notes: Vec<&'static str> = Vec::new();
        let source = self.resolve_in_inbox(src, target)?;

        let (root, mut segments) = match DestinationRoot::from_alias(raw_root) {
            Some(root) => (root, Vec::new()),
            None => {
                // "Documents/Finance" given as the root
                let trimmed = raw_root.trim().trim_matches('/');
                let (head, rest) = trimmed.split_once('/').ok_or_else(|| {
                    ValidationError::DestinationNotAllowed(raw_root.to_string())
                })?;
                let root = DestinationRoot::from_alias(head)
                    .ok_or_else(|| ValidationError::DestinationNotAllowed(raw_root.to_string()))?;
                notes.push("auto_split_root_subpath");
                (root, split_segments(rest)?)
            }
        };

        let pattern = self
            .policy
            .get(root)
            .ok_or_else(|| ValidationError::DestinationNotAllowed(root.to_string()))?;

        if let Some(raw) = subpath.map(str::trim).filter(|s| !s.is_empty()) {
            segments.extend(self.subpath_segments(root, raw)?);
        }

        if segments.is_empty() && pattern.requires_subfolder {
            segments = self.default_segments(&source);
            notes.push("default_subpath");
        }
        if segments.is_empty() && pattern.requires_subfolder {
            return Err(ValidationError::MissingSubfolder(root));
        }

        if let Some(first) = segments.first_mut() {
            match self.taxonomy.canonical(root, first) {
                Some(canonical) if canonical != first.as_str() => {
                    *first = canonical.to_string();
                    notes.push("category_case");
                }
                Some(_) => {}
                None if self.enforce_taxonomy
                    && !self.taxonomy.categories(root).is_empty() =>
                {
                    return Err(ValidationError::UnknownCategory {
                        root,
                        category: first.clone(),
                    });
                }
                None => {}
            }
        }

        let segments: Vec<String> = segments.iter().map(|s| sanitize_segment(s)).collect();
        let destination_dir = segments
            .iter()
            .fold(self.layout.root_dir(root), |acc, s| acc.join(s));
        let destination_dir = self
            .guard
            .validate_new(&destination_dir)
            .map_err(|e| ValidationError::PathEscape(e.to_string()))?;

        let file_name = self.file_name_for(&source, filename, &mut notes);
        let planned_name =
            first_free_name(&destination_dir, &file_name).unwrap_or_else(|_| file_name.clone());

        Ok(MovePlan {
            planned_destination: destination_dir.join(planned_name),
            source,
            destination_root: root,
            segments,
            destination_dir,
            file_name,
            notes,
        })
    }

    /// Existing path inside INBOX. Missing means the current target.
    fn resolve_in_inbox(
        &self,
        raw: Option<&str>,
        target: &Path,
    ) -> Result<PathBuf, ValidationError> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty());
        let candidate = match raw {
            Some(raw) => PathBuf::from(raw),
            None => target.to_path_buf(),
        };

        if candidate.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::PathEscape(candidate.display().to_string()));
        }

        let resolved = self.guard.validate(&candidate).map_err(|_| {
            let anchored = if candidate.is_absolute() {
                candidate.clone()
            } else {
                self.guard.root().join(&candidate)
            };
            if fs::symlink_metadata(&anchored).is_err() {
                ValidationError::Missing(candidate.display().to_string())
            } else {
                ValidationError::PathEscape(candidate.display().to_string())
            }
        })?;

        if !self.layout.is_in_inbox(&resolved) || self.layout.is_in_moved_today(&resolved) {
            return Err(ValidationError::OutsideInbox(self.layout.display(&resolved)));
        }
        Ok(resolved)
    }

    fn subpath_segments(
        &self,
        root: DestinationRoot,
        raw: &str,
    ) -> Result<Vec<String>, ValidationError> {
        let path = Path::new(raw);
        if path.is_absolute() {
            let root_dir = self.layout.root_dir(root);
            let relative = path
                .strip_prefix(&root_dir)
                .map_err(|_| ValidationError::PathEscape(raw.to_string()))?;
            return split_segments(&relative.to_string_lossy());
        }
        split_segments(raw)
    }

    /// The source's parent folders below INBOX, or a catch-all folder.
    fn default_segments(&self, source: &Path) -> Vec<String> {
        let parents: Vec<String> = source
            .parent()
            .and_then(|parent| self.layout.relative_to_inbox(parent))
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        if parents.is_empty() {
            vec![DEFAULT_SUBFOLDER.to_string()]
        } else {
            parents
        }
    }

    /// ASCII-safe target name. A file keeps its extension even when renamed.
    fn file_name_for(
        &self,
        source: &Path,
        requested: Option<&str>,
        notes: &mut Vec<&'static str>,
    ) -> String {
        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let requested = requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|r| Path::new(r).file_name())
            .map(|n| n.to_string_lossy().into_owned());

        let name = normalize_file_name(
            requested.as_deref().unwrap_or(&source_name),
            DEFAULT_MAX_NAME_LEN,
        );
        if requested.is_none() || !source.is_file() {
            return name;
        }

        let normalized_source = normalize_file_name(&source_name, DEFAULT_MAX_NAME_LEN);
        let (_, source_ext) = split_extension(&normalized_source);
        let (_, ext) = split_extension(&name);
        if source_ext.is_empty() || ext.eq_ignore_ascii_case(source_ext) {
            return name;
        }
        notes.push("extension_restored");
        truncate_preserving_extension(&format!("{}{}", name, source_ext), DEFAULT_MAX_NAME_LEN)
    }
}

/// Splits a relative subpath on either separator, refusing `..`.
fn split_segments(raw: &str) -> Result<Vec<String>, ValidationError> {
    let mut segments = Vec::new();
    for part in raw.split(['/', '\\']) {
        match part.trim() {
            "" | "." => continue,
            ".." => return Err(ValidationError::PathEscape(raw.to_string())),
            segment => segments.push(segment.to_string()),
        }
    }
    Ok(segments)
}
