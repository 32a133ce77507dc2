//! Draining phase: restructure leftover inbox folders and prune empty ones.

use crate::interfaces::RuntimeError;
use crate::run_config::{FlattenRule, PeopleTable};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use vault_sort_tools::fs_ops::{move_exact, move_no_clobber};
use vault_sort_tools::vault::MOVED_TODAY_DIR;

/// One wrapper folder and the single directory it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenStep {
    pub wrapper: PathBuf,
    pub child: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flattened {
    pub wrapper: PathBuf,
    pub hoisted_to: PathBuf,
}

pub struct Flattener {
    rule: FlattenRule,
    year_re: Regex,
    people: PeopleTable,
}

impl Flattener {
    pub fn new(rule: FlattenRule, people: PeopleTable) -> Result<Self, RuntimeError> {
        let year_re = Regex::new(&rule.year_dir_regex).map_err(|e| {
            RuntimeError::ConfigError(format!("Invalid year directory pattern: {}", e))
        })?;
        Ok(Self {
            rule,
            year_re,
            people,
        })
    }

    /// Wrappers that qualify right now, deepest first.
    pub fn plan(&self, inbox: &Path) -> Vec<FlattenStep> {
        let mut found: Vec<(usize, FlattenStep)> = Vec::new();
        self.collect(inbox, inbox, 0, &mut found);
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.wrapper.cmp(&b.1.wrapper)));
        found.into_iter().map(|(_, step)| step).collect()
    }

    fn collect(
        &self,
        dir: &Path,
        inbox: &Path,
        depth: usize,
        found: &mut Vec<(usize, FlattenStep)>,
    ) {
        for child in subdirs(dir) {
            if dir == inbox && child.file_name().map(|n| n == MOVED_TODAY_DIR).unwrap_or(false) {
                continue;
            }
            if let Some(only) = self.single_child(&child) {
                found.push((
                    depth,
                    FlattenStep {
                        wrapper: child.clone(),
                        child: only,
                    },
                ));
            }
            self.collect(&child, inbox, depth + 1, found);
        }
    }

    /// The lone directory inside `wrapper`, if `wrapper` qualifies.
    pub fn single_child(&self, wrapper: &Path) -> Option<PathBuf> {
        let name = wrapper.file_name()?.to_string_lossy().into_owned();
        if self.rule.require_owner_label && !self.people.is_owner_name(&name) {
            return None;
        }

        let mut visible = fs::read_dir(wrapper)
            .ok()?
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'));
        let only = visible.next()?;
        if visible.next().is_some() {
            return None;
        }
        if !only.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            return None;
        }

        let child_name = only.file_name().to_string_lossy().into_owned();
        if self.rule.preserve_year_dirs && self.year_re.is_match(&child_name) {
            return None;
        }
        Some(only.path())
    }

    /// Runs up to `max_passes` passes. In dry run only the first pass is
    /// reported, since nothing changes between passes.
    pub fn apply(&self, inbox: &Path, dry_run: bool) -> Vec<Flattened> {
        let mut done = Vec::new();
        if !self.rule.enabled {
            return done;
        }

        for pass in 0..self.rule.max_passes {
            let steps = self.plan(inbox);
            if steps.is_empty() {
                break;
            }
            debug!("Flatten pass {}: {} candidates", pass + 1, steps.len());

            if dry_run {
                for step in steps {
                    info!(
                        "[dry-run] Would hoist {} out of {}",
                        step.child.display(),
                        step.wrapper.display()
                    );
                    let hoisted_to = step
                        .wrapper
                        .parent()
                        .map(|p| p.join(step.child.file_name().unwrap_or_default()))
                        .unwrap_or_default();
                    done.push(Flattened {
                        wrapper: step.wrapper,
                        hoisted_to,
                    });
                }
                break;
            }

            let before = done.len();
            for step in steps {
                // An earlier hoist in this pass may have changed the wrapper
                let Some(child) = self.single_child(&step.wrapper) else {
                    continue;
                };
                if let Some(flattened) = hoist(&step.wrapper, &child) {
                    done.push(flattened);
                }
            }
            if done.len() == before {
                break;
            }
        }
        done
    }
}

fn hoist(wrapper: &Path, child: &Path) -> Option<Flattened> {
    let parent = wrapper.parent()?;
    let name = child.file_name()?.to_string_lossy().into_owned();
    if wrapper.file_name().map(|w| w.to_string_lossy() == name.as_str()) == Some(true) {
        return hoist_same_name(wrapper, parent, &name);
    }

    let hoisted_to = match move_no_clobber(child, parent, &name) {
        Ok(path) => path,
        Err(e) => {
            warn!("Could not hoist {}: {}", child.display(), e);
            return None;
        }
    };
    if let Err(e) = fs::remove_dir(wrapper) {
        warn!("Hoisted out of {} but could not remove it: {}", wrapper.display(), e);
    }
    info!("Flattened {} -> {}", wrapper.display(), hoisted_to.display());
    Some(Flattened {
        wrapper: wrapper.to_path_buf(),
        hoisted_to,
    })
}

/// `X/X` collapses to `X`: the wrapper steps aside under a hidden name so the
/// child can take the freed name.
fn hoist_same_name(wrapper: &Path, parent: &Path, name: &str) -> Option<Flattened> {
    let aside = match move_no_clobber(wrapper, parent, &format!(".{}.flatten", name)) {
        Ok(path) => path,
        Err(e) => {
            warn!("Could not move {} aside: {}", wrapper.display(), e);
            return None;
        }
    };
    let hoisted_to = match move_no_clobber(&aside.join(name), parent, name) {
        Ok(path) => path,
        Err(e) => {
            warn!("Could not hoist out of {}: {}", wrapper.display(), e);
            if let Err(e) = move_exact(&aside, wrapper) {
                warn!("Left {} at {}: {}", wrapper.display(), aside.display(), e);
            }
            return None;
        }
    };
    if let Err(e) = fs::remove_dir(&aside) {
        warn!("Hoisted out of {} but could not remove it: {}", aside.display(), e);
    }
    info!("Flattened {} -> {}", wrapper.display(), hoisted_to.display());
    Some(Flattened {
        wrapper: wrapper.to_path_buf(),
        hoisted_to,
    })
}

/// Real subdirectories, symlinks and hidden entries excluded, sorted.
fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    out.sort();
    out
}

/// Removes every empty directory below `inbox`, depth first. The inbox
/// itself, the breadcrumb area and symlinks are left alone.
pub fn remove_empty_dirs(inbox: &Path) -> usize {
    let mut removed = 0;
    prune(inbox, inbox, &mut removed);
    removed
}

fn prune(dir: &Path, inbox: &Path, removed: &mut usize) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        if dir == inbox && entry.file_name() == MOVED_TODAY_DIR {
            continue;
        }
        let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        let child = entry.path();
        prune(&child, inbox, removed);
        if fs::remove_dir(&child).is_ok() {
            debug!("Removed empty directory {}", child.display());
            *removed += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::run_config::Person;
    use tempfile::TempDir;

    fn people() -> PeopleTable {
        PeopleTable {
            people: vec![
                Person {
                    label: "Alice".into(),
                    patterns: vec!["alice".into()],
                },
                Person {
                    label: "Bob".into(),
                    patterns: vec!["bob".into()],
                },
            ],
        }
    }

    fn flattener(rule: FlattenRule) -> Flattener {
        Flattener::new(rule, people()).unwrap()
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_owner_wrapper_hoisted() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        touch(&inbox.join("Alice/Taxes/2023.pdf"));

        let done = flattener(FlattenRule::default()).apply(inbox, false);

        assert_eq!(done.len(), 1);
        assert!(inbox.join("Taxes/2023.pdf").is_file());
        assert!(!inbox.join("Alice").exists());
    }

    #[test]
    fn test_non_owner_and_busy_wrappers_kept() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        touch(&inbox.join("Holidays/Rome/a.jpg"));
        touch(&inbox.join("Bob/Car/a.pdf"));
        touch(&inbox.join("Bob/notes.txt"));

        let done = flattener(FlattenRule::default()).apply(inbox, false);

        assert!(done.is_empty());
        assert!(inbox.join("Holidays/Rome/a.jpg").is_file());
        assert!(inbox.join("Bob/Car/a.pdf").is_file());
    }

    #[test]
    fn test_same_name_wrapper_collapses() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        touch(&inbox.join("Alice/Alice/a.pdf"));

        let done = flattener(FlattenRule::default()).apply(inbox, false);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].hoisted_to, inbox.join("Alice"));
        assert!(inbox.join("Alice/a.pdf").is_file());
        assert!(!inbox.join("Alice (1)").exists());
        let leftovers: Vec<_> = fs::read_dir(inbox).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_year_dirs_preserved() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        touch(&inbox.join("Alice/2021/a.pdf"));

        assert!(flattener(FlattenRule::default()).apply(inbox, false).is_empty());

        let rule = FlattenRule {
            preserve_year_dirs: false,
            ..FlattenRule::default()
        };
        assert_eq!(flattener(rule).apply(inbox, false).len(), 1);
        assert!(inbox.join("2021/a.pdf").is_file());
    }

    #[test]
    fn test_nested_owner_chain_resolved() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        touch(&inbox.join("Alice/Bob/Insurance/policy.pdf"));

        let done = flattener(FlattenRule::default()).apply(inbox, false);

        assert_eq!(done.len(), 2);
        assert!(inbox.join("Insurance/policy.pdf").is_file());
        assert!(!inbox.join("Alice").exists());
    }

    #[test]
    fn test_pass_limit_respected() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        touch(&inbox.join("Alice/Bob/Insurance/policy.pdf"));

        let rule = FlattenRule {
            max_passes: 0,
            ..FlattenRule::default()
        };
        assert!(flattener(rule).apply(inbox, false).is_empty());
        assert!(inbox.join("Alice/Bob/Insurance/policy.pdf").is_file());
    }

    #[test]
    fn test_dry_run_reports_without_moving() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        touch(&inbox.join("Alice/Taxes/a.pdf"));

        let done = flattener(FlattenRule::default()).apply(inbox, true);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].hoisted_to, inbox.join("Taxes"));
        assert!(inbox.join("Alice/Taxes/a.pdf").is_file());
    }

    #[test]
    fn test_remove_empty_dirs() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path();
        fs::create_dir_all(inbox.join("a/b/c")).unwrap();
        touch(&inbox.join("keep/file.txt"));
        fs::create_dir_all(inbox.join(MOVED_TODAY_DIR).join("2024-01-01")).unwrap();

        let removed = remove_empty_dirs(inbox);

        assert_eq!(removed, 3);
        assert!(!inbox.join("a").exists());
        assert!(inbox.join("keep/file.txt").is_file());
        assert!(inbox.join(MOVED_TODAY_DIR).join("2024-01-01").is_dir());
        assert!(inbox.is_dir());
    }
}
