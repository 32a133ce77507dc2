use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Failures a path may accumulate before it is skipped for the run.
    pub max_attempts: u32,
}

impl CooldownPolicy {
    pub fn new(base: Duration, factor: u32, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            factor,
            max_delay,
            max_attempts,
        }
    }

    /// `base * factor^(attempts-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        self.base
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 2, Duration::from_secs(60), 3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub path: PathBuf,
    pub attempts: u32,
    pub last_failure: String,
    pub retry_at: Instant,
    pub permanently_skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownVerdict {
    RetryAt(Instant),
    PermanentlySkipped,
}

/// Per-path failure history. At most one entry per path.
pub struct CooldownQueue {
    policy: CooldownPolicy,
    entries: HashMap<PathBuf, QueueItem>,
}

impl CooldownQueue {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    /// Counts a failed or deferred attempt and pushes the retry time out.
    pub fn record_failure(
        &mut self,
        path: &Path,
        reason: impl Into<String>,
        now: Instant,
    ) -> CooldownVerdict {
        let policy = self.policy;
        let item = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| QueueItem {
                path: path.to_path_buf(),
                attempts: 0,
                last_failure: String::new(),
                retry_at: now,
                permanently_skipped: false,
            });

        item.attempts = item.attempts.saturating_add(1);
        item.last_failure = reason.into();
        // Never earlier than an already scheduled retry
        item.retry_at = item.retry_at.max(now + policy.delay_for(item.attempts));

        if item.attempts >= policy.max_attempts {
            item.permanently_skipped = true;
            CooldownVerdict::PermanentlySkipped
        } else {
            CooldownVerdict::RetryAt(item.retry_at)
        }
    }

    pub fn record_success(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn is_eligible(&self, path: &Path, now: Instant) -> bool {
        match self.entries.get(path) {
            None => true,
            Some(item) => !item.permanently_skipped && now >= item.retry_at,
        }
    }

    pub fn is_skipped(&self, path: &Path) -> bool {
        self.entries
            .get(path)
            .map(|item| item.permanently_skipped)
            .unwrap_or(false)
    }

    /// When a cooling path becomes eligible. `None` for unknown or skipped paths.
    pub fn retry_at(&self, path: &Path) -> Option<Instant> {
        self.entries
            .get(path)
            .filter(|item| !item.permanently_skipped)
            .map(|item| item.retry_at)
    }

    /// Earliest retry time still in the future, across all cooling paths.
    pub fn next_ready_at(&self, now: Instant) -> Option<Instant> {
        self.entries
            .values()
            .filter(|item| !item.permanently_skipped && item.retry_at > now)
            .map(|item| item.retry_at)
            .min()
    }

    pub fn get(&self, path: &Path) -> Option<&QueueItem> {
        self.entries.get(path)
    }

    /// Drops every entry at or below `base`, e.g. after the folder moved away.
    pub fn forget_under(&mut self, base: &Path) {
        self.entries.retain(|path, _| !path.starts_with(base));
    }

    pub fn permanently_skipped(&self) -> Vec<PathBuf> {
        let mut skipped: Vec<PathBuf> = self
            .entries
            .values()
            .filter(|item| item.permanently_skipped)
            .map(|item| item.path.clone())
            .collect();
        skipped.sort();
        skipped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
