//! Starting phase: stage configured intake folders into INBOX.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vault_sort_tools::fs_ops::move_no_clobber;
use vault_sort_tools::sandbox::naming::{first_free_name, DEFAULT_MAX_NAME_LEN};
use vault_sort_tools::sandbox::normalize_file_name;
use vault_sort_tools::snapshot::name_order;
use vault_sort_tools::VaultLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeMove {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub moves: Vec<IntakeMove>,
}

impl IntakeReport {
    pub fn moved(&self) -> usize {
        self.moves.iter().filter(|m| m.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.moves.iter().filter(|m| m.error.is_some()).count()
    }
}

/// Moves every visible top-level entry of each root into INBOX as a unit,
/// so folder structure below it is kept. Never replaces anything in INBOX.
pub fn stage_intake_roots(roots: &[PathBuf], layout: &VaultLayout, dry_run: bool) -> IntakeReport {
    let mut report = IntakeReport::default();

    for root in roots {
        let root = match fs::canonicalize(root) {
            Ok(root) if root.is_dir() => root,
            _ => {
                warn!("Intake root {} is missing, skipping", root.display());
                continue;
            }
        };
        if root.starts_with(layout.root()) {
            warn!("Intake root {} lies inside the vault, skipping", root.display());
            continue;
        }

        let entries = match visible_entries(&root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read intake root {}: {}", root.display(), e);
                continue;
            }
        };

        for entry in entries {
            // An intake root may be an ancestor of the vault, e.g. the home folder
            if layout.root().starts_with(&entry) {
                continue;
            }
            report.moves.push(stage_entry(&entry, layout, dry_run));
        }
    }

    if report.moves.is_empty() {
        info!("Intake: nothing to stage");
    } else {
        info!(
            "Intake: {} staged, {} failed",
            report.moved(),
            report.failed()
        );
    }
    report
}

fn stage_entry(entry: &Path, layout: &VaultLayout, dry_run: bool) -> IntakeMove {
    let raw_name = entry
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = normalize_file_name(&raw_name, DEFAULT_MAX_NAME_LEN);

    if dry_run {
        let free = first_free_name(layout.inbox(), &name).unwrap_or(name);
        let destination = layout.inbox().join(free);
        info!(
            "[dry-run] Would stage {} -> {}",
            entry.display(),
            layout.display(&destination)
        );
        return IntakeMove {
            source: entry.to_path_buf(),
            destination: Some(destination),
            error: None,
        };
    }

    match move_no_clobber(entry, layout.inbox(), &name) {
        Ok(destination) => {
            info!(
                "Staged {} -> {}",
                entry.display(),
                layout.display(&destination)
            );
            IntakeMove {
                source: entry.to_path_buf(),
                destination: Some(destination),
                error: None,
            }
        }
        Err(e) => {
            warn!("Could not stage {}: {}", entry.display(), e);
            IntakeMove {
                source: entry.to_path_buf(),
                destination: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Non-hidden, non-symlink entries in listing order.
fn visible_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().map(|ft| ft.is_symlink()).unwrap_or(true) {
            continue;
        }
        names.push(name);
    }
    names.sort_by(|a, b| name_order(a, b));
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault(temp: &TempDir) -> VaultLayout {
        let root = temp.path().join("vault");
        fs::create_dir_all(&root).unwrap();
        let layout = VaultLayout::new(&root).unwrap();
        layout.ensure().unwrap();
        layout
    }

    #[test]
    fn test_entries_moved_with_subtrees() {
        let temp = TempDir::new().unwrap();
        let layout = vault(&temp);
        let downloads = temp.path().join("Downloads");
        fs::create_dir_all(downloads.join("album/disc1")).unwrap();
        fs::write(downloads.join("album/disc1/01.mp3"), "a").unwrap();
        fs::write(downloads.join("Résumé.pdf"), "r").unwrap();
        fs::write(downloads.join(".DS_Store"), "h").unwrap();

        let report = stage_intake_roots(&[downloads.clone()], &layout, false);

        assert_eq!(report.moved(), 2);
        assert!(layout.inbox().join("album/disc1/01.mp3").is_file());
        assert!(layout.inbox().join("Resume.pdf").is_file());
        assert!(downloads.join(".DS_Store").exists());
        assert!(!downloads.join("album").exists());
    }

    #[test]
    fn test_existing_inbox_names_not_replaced() {
        let temp = TempDir::new().unwrap();
        let layout = vault(&temp);
        fs::write(layout.inbox().join("notes.txt"), "old").unwrap();
        let desktop = temp.path().join("Desktop");
        fs::create_dir_all(&desktop).unwrap();
        fs::write(desktop.join("notes.txt"), "new").unwrap();

        stage_intake_roots(&[desktop], &layout, false);

        assert_eq!(fs::read_to_string(layout.inbox().join("notes.txt")).unwrap(), "old");
        assert_eq!(
            fs::read_to_string(layout.inbox().join("notes (1).txt")).unwrap(),
            "new"
        );
    }

    #[test]
    fn test_dry_run_and_missing_roots() {
        let temp = TempDir::new().unwrap();
        let layout = vault(&temp);
        let downloads = temp.path().join("Downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("a.pdf"), "a").unwrap();

        let report = stage_intake_roots(
            &[temp.path().join("missing"), downloads.clone()],
            &layout,
            true,
        );

        assert_eq!(report.moves.len(), 1);
        assert_eq!(
            report.moves[0].destination,
            Some(layout.inbox().join("a.pdf"))
        );
        assert!(downloads.join("a.pdf").exists());
        assert!(!layout.inbox().join("a.pdf").exists());
    }

    #[test]
    fn test_vault_ancestor_never_staged() {
        let temp = TempDir::new().unwrap();
        let layout = vault(&temp);
        fs::write(temp.path().join("loose.txt"), "x").unwrap();

        let report = stage_intake_roots(&[temp.path().to_path_buf()], &layout, false);

        assert_eq!(report.moved(), 1);
        assert!(layout.root().is_dir());
        assert!(layout.inbox().join("loose.txt").is_file());
    }
}
