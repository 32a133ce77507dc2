//! Fixed directory layout of a vault.

use crate::error::ToolError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const INBOX_DIR: &str = "INBOX";
pub const MOVED_TODAY_DIR: &str = "_moved_today";

/// Top-level destination directories a move may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DestinationRoot {
    Documents,
    Media,
    Projects,
}

impl DestinationRoot {
    pub const ALL: [DestinationRoot; 3] = [
        DestinationRoot::Documents,
        DestinationRoot::Media,
        DestinationRoot::Projects,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DestinationRoot::Documents => "Documents",
            DestinationRoot::Media => "Media",
            DestinationRoot::Projects => "Projects",
        }
    }

    /// Case-insensitive lookup that ignores surrounding whitespace and slashes.
    pub fn from_alias(raw: &str) -> Option<Self> {
        let key = raw.trim().trim_matches('/').to_lowercase();
        Self::ALL
            .into_iter()
            .find(|root| root.label().to_lowercase() == key)
    }
}

impl fmt::Display for DestinationRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct VaultLayout {
    root: PathBuf,
    inbox: PathBuf,
    moved_today: PathBuf,
}

impl VaultLayout {
    /// The vault root must already exist; everything below it is derived.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = fs::canonicalize(root.as_ref()).map_err(|e| {
            ToolError::SandboxViolation(format!(
                "Invalid vault root {}: {}",
                root.as_ref().display(),
                e
            ))
        })?;
        if !root.is_dir() {
            return Err(ToolError::SandboxViolation(format!(
                "Vault root is not a directory: {}",
                root.display()
            )));
        }
        let inbox = root.join(INBOX_DIR);
        let moved_today = inbox.join(MOVED_TODAY_DIR);
        Ok(Self {
            root,
            inbox,
            moved_today,
        })
    }

    /// Creates INBOX, the breadcrumb area and every destination root.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.moved_today)?;
        for root in DestinationRoot::ALL {
            fs::create_dir_all(self.root_dir(root))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    pub fn moved_today(&self) -> &Path {
        &self.moved_today
    }

    pub fn root_dir(&self, root: DestinationRoot) -> PathBuf {
        self.root.join(root.label())
    }

    pub fn breadcrumb_dir(&self, date: NaiveDate) -> PathBuf {
        self.moved_today.join(date.format("%Y-%m-%d").to_string())
    }

    /// True for paths strictly below INBOX.
    pub fn is_in_inbox(&self, path: &Path) -> bool {
        path != self.inbox && path.starts_with(&self.inbox)
    }

    pub fn is_in_moved_today(&self, path: &Path) -> bool {
        path.starts_with(&self.moved_today)
    }

    pub fn relative_to_inbox<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.inbox).ok()
    }

    /// Vault-relative rendering used in prompts and logs.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_alias_lookup() {
        assert_eq!(
            DestinationRoot::from_alias(" documents/ "),
            Some(DestinationRoot::Documents)
        );
        assert_eq!(DestinationRoot::from_alias("MEDIA"), Some(DestinationRoot::Media));
        assert_eq!(DestinationRoot::from_alias("Downloads"), None);
    }

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path()).unwrap();
        layout.ensure().unwrap();

        assert!(layout.inbox().is_dir());
        assert!(layout.moved_today().is_dir());
        assert!(layout.root_dir(DestinationRoot::Projects).is_dir());

        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert!(layout
            .breadcrumb_dir(date)
            .ends_with("INBOX/_moved_today/2024-03-09"));
    }

    #[test]
    fn test_inbox_membership() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path()).unwrap();

        assert!(!layout.is_in_inbox(layout.inbox()));
        assert!(layout.is_in_inbox(&layout.inbox().join("a.txt")));
        assert!(layout.is_in_moved_today(&layout.moved_today().join("x")));
        assert_eq!(layout.display(&layout.inbox().join("a.txt")), "INBOX/a.txt");
    }

    #[test]
    fn test_missing_root_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(VaultLayout::new(temp.path().join("missing")).is_err());
    }
}
