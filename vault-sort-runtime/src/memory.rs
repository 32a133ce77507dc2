//! Bounded window of recent tool observations.

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEntry {
    pub step: u64,
    pub tool: String,
    pub path: String,
    pub summary: serde_json::Value,
    /// Whether the step changed anything: a move, an expansion or a first read.
    #[serde(skip)]
    pub progressed: bool,
}

/// Most recent entries first-in first-out, at most `limit` of them.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    limit: usize,
    entries: VecDeque<MemoryEntry>,
}

impl MemoryWindow {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: VecDeque::with_capacity(limit),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn push(&mut self, entry: MemoryEntry) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Whether `tool` already read `path` within the window.
    pub fn contains_read(&self, tool: &str, path: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.progressed && e.tool == tool && e.path == path)
    }

    /// The window is full and none of it made progress.
    pub fn is_stalled(&self) -> bool {
        self.limit > 0
            && self.entries.len() >= self.limit
            && !self.entries.iter().any(|e| e.progressed)
    }

    /// Entries worth showing the oracle: reads and hints, oldest first.
    pub fn observations(&self) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.tool.as_str(), "list_dir" | "inspect_file" | "owner_hint"))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
