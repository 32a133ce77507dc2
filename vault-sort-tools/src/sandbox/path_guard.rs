use crate::error::ToolError;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Confines every path the tools touch to the vault root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    vault_root: PathBuf,
}

impl PathGuard {
    pub fn new(vault_root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = fs::canonicalize(vault_root)
            .map_err(|e| ToolError::SandboxViolation(format!("Invalid vault root: {}", e)))?;
        Ok(Self { vault_root: root })
    }

    pub fn root(&self) -> &Path {
        &self.vault_root
    }

    /// Resolves an existing path given either vault-relative or absolute.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf, ToolError> {
        let full_path = self.anchor(path.as_ref())?;

        // Canonicalize to resolve symlinks
        let canonical = fs::canonicalize(&full_path).map_err(|_| {
            ToolError::SandboxViolation(format!(
                "Path does not exist or is inaccessible: {}",
                full_path.display()
            ))
        })?;

        if !canonical.starts_with(&self.vault_root) {
            return Err(ToolError::SandboxViolation("Path escapes vault".into()));
        }

        Ok(canonical)
    }

    /// Like [`validate`](Self::validate) but for a path that may not exist yet.
    pub fn validate_new(&self, path: impl AsRef<Path>) -> Result<PathBuf, ToolError> {
        let full_path = self.anchor(path.as_ref())?;

        let relative = full_path
            .strip_prefix(&self.vault_root)
            .map_err(|_| ToolError::SandboxViolation("Path escapes vault".into()))?;

        // Every existing prefix must stay inside after symlink resolution
        let mut current = self.vault_root.clone();
        for component in relative.components() {
            current.push(component);
            if fs::symlink_metadata(&current).is_err() {
                break;
            }
            if let Ok(canonical) = fs::canonicalize(&current) {
                if !canonical.starts_with(&self.vault_root) {
                    return Err(ToolError::SandboxViolation(
                        "Symlink escapes vault".into(),
                    ));
                }
            }
        }

        Ok(full_path)
    }

    fn anchor(&self, path: &Path) -> Result<PathBuf, ToolError> {
        if path.as_os_str().is_empty() {
            return Err(ToolError::ValidationError("Empty path".into()));
        }

        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ToolError::SandboxViolation(
                "Path traversal detected".into(),
            ));
        }

        if path.is_absolute() {
            if path.starts_with(&self.vault_root) {
                return Ok(path.to_path_buf());
            }
            // The caller may hold a non-canonical spelling of the root
            if let Ok(canonical) = fs::canonicalize(path) {
                if canonical.starts_with(&self.vault_root) {
                    return Ok(canonical);
                }
            }
            return Err(ToolError::SandboxViolation("Path escapes vault".into()));
        }

        Ok(self.vault_root.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_and_absolute_accepted() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "x").unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();

        let rel = guard.validate("a.txt").unwrap();
        let abs = guard.validate(guard.root().join("a.txt")).unwrap();
        assert_eq!(rel, abs);
    }

    #[test]
    fn test_parent_component_rejected() {
        let temp = TempDir::new().unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();

        assert!(matches!(
            guard.validate_new("INBOX/../../etc"),
            Err(ToolError::SandboxViolation(_))
        ));
    }

    #[test]
    fn test_dotted_file_name_is_not_traversal() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("v1..2.txt"), "x").unwrap();
        let guard = PathGuard::new(temp.path()).unwrap();

        assert!(guard.validate("v1..2.txt").is_ok());
    }

    #[test]
    fn test_outside_absolute_rejected() {
        let vault = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let guard = PathGuard::new(vault.path()).unwrap();

        assert!(guard.validate(other.path()).is_err());
        assert!(guard.validate_new(other.path().join("new")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let vault = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        std::os::unix::fs::symlink(other.path(), vault.path().join("link")).unwrap();
        let guard = PathGuard::new(vault.path()).unwrap();

        assert!(guard.validate("link").is_err());
        assert!(guard.validate_new("link/new.txt").is_err());
    }
}
