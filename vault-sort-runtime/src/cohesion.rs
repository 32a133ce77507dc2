//! Folder cohesion.
//!
//! Every planned file move out of an inbox folder counts as a vote for that
//! folder's destination. Once enough siblings agree, and they look like one
//! kind of content, the folder is moved as a whole instead of file by file.

use crate::run_config::CohesionConfig;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use vault_sort_tools::classify::extension_of;
use vault_sort_tools::DestinationRoot;

/// One destination, as `root` plus `/`-joined subfolders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vote {
    pub root: DestinationRoot,
    pub subpath: String,
}

#[derive(Debug, Default)]
struct Tally {
    files: HashSet<PathBuf>,
    votes: BTreeMap<Vote, usize>,
    exts: BTreeMap<String, usize>,
}

pub struct CohesionTracker {
    config: CohesionConfig,
    tallies: HashMap<PathBuf, Tally>,
    escalated: HashSet<PathBuf>,
}

impl CohesionTracker {
    pub fn new(config: CohesionConfig) -> Self {
        Self {
            config,
            tallies: HashMap::new(),
            escalated: HashSet::new(),
        }
    }

    /// Counts `file`'s vote for `parent` and returns the folder's consensus
    /// the first time one holds. A folder escalates at most once.
    pub fn note(&mut self, parent: &Path, file: &Path, vote: Vote) -> Option<Vote> {
        if !self.config.enabled || self.escalated.contains(parent) {
            return None;
        }

        let tally = self.tallies.entry(parent.to_path_buf()).or_default();
        if tally.files.insert(file.to_path_buf()) {
            *tally.votes.entry(vote).or_insert(0) += 1;
            *tally.exts.entry(extension_of(file)).or_insert(0) += 1;
        }

        let consensus = self.consensus(parent)?;
        self.escalated.insert(parent.to_path_buf());
        self.tallies.remove(parent);
        Some(consensus)
    }

    fn consensus(&self, parent: &Path) -> Option<Vote> {
        let tally = self.tallies.get(parent)?;
        let total: usize = tally.votes.values().sum();
        if total < self.config.min_votes {
            return None;
        }

        // Ties go to the smallest destination so the choice is stable
        let (best, count) = tally
            .votes
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;
        if (*count as f64) / (total as f64) < self.config.purity_min {
            return None;
        }
        if entropy(&tally.exts) > self.config.max_ext_entropy {
            return None;
        }
        if visible_children(parent) > self.config.max_children {
            return None;
        }
        Some(best.clone())
    }
}

/// Shannon entropy of the extension mix, in bits.
fn entropy(counts: &BTreeMap<String, usize>) -> f64 {
    let total: usize = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

fn visible_children(dir: &Path) -> usize {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .count(),
        Err(_) => usize::MAX,
    }
}
