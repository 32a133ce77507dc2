//! Step loop over the inbox frontier.
//!
//! Each step picks the first eligible pending item, shows the oracle a fresh
//! observation of it, validates the reply and runs at most one tool. Reads
//! keep the item at the front of the frontier, moves retire it, and every
//! failure sends it through the cooldown queue.

use crate::cohesion::{CohesionTracker, Vote};
use crate::interfaces::{LlmBackend, RuntimeError};
use crate::llm_client::head;
use crate::memory::{MemoryEntry, MemoryWindow};
use crate::metrics::MetricTimer;
use crate::oracle::{ActionOracle, OracleSettings};
use crate::prompt::{PromptBuilder, PromptContext};
use crate::run_config::{PeopleTable, RunConfig, TreeDepths};
use crate::types::{Action, Decision};
use crate::validator::{ActionValidator, MovePlan, ValidatedAction, ValidationError};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vault_sort::infra::{
    AuditEvent, AuditLogger, CooldownQueue, CooldownVerdict, ExecutionOutcome, Stage, StepRecord,
    ValidationOutcome,
};
use vault_sort_tools::snapshot::EntryKind;
use vault_sort_tools::{
    ExecutionContext, ListDirOutput, MoveRecord, Observation, SnapshotBuilder, ToolDispatcherImpl,
    ToolError, ToolRegistryImpl, ToolResult, TreeNode, VaultLayout,
};

const EXCERPT_IN_MEMORY: usize = 300;

/// Why the loop handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    StepCeiling,
    Stalled,
    InboxExhausted,
    Interrupted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepCounters {
    pub steps: u64,
    pub moves: u64,
    pub rejections: u64,
    pub deferrals: u64,
    pub failures: u64,
    /// Items that were gone by the time they were acted on.
    pub resolved: u64,
    /// Items left alone on purpose, e.g. dependency trees.
    pub skipped: u64,
    /// File moves turned into a move of their whole folder.
    pub escalations: u64,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_steps: u64,
    pub mem_limit: usize,
    pub inspect_cap: u32,
    pub list_cap: u32,
    pub tool_timeout_ms: u64,
    pub dry_run: bool,
    pub n_predict_probe: u32,
    pub n_predict_decide: u32,
    pub tree_depth: TreeDepths,
    pub tree_dir_cap: usize,
    pub tree_ttl_steps: u64,
    pub dependency_dirs: HashSet<String>,
    /// Breadcrumb date; today when unset.
    pub date: Option<NaiveDate>,
}

impl LoopSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_steps: config.limits.max_steps,
            mem_limit: config.limits.mem_limit,
            inspect_cap: config.limits.inspect_cap_per_file,
            list_cap: config.limits.list_cap_per_dir,
            tool_timeout_ms: config.limits.tool_timeout_ms,
            dry_run: config.dry_run,
            n_predict_probe: config.oracle.n_predict_probe,
            n_predict_decide: config.oracle.n_predict_decide,
            tree_depth: config.limits.tree_depth,
            tree_dir_cap: config.limits.tree_dir_cap,
            tree_ttl_steps: config.limits.tree_ttl_steps,
            dependency_dirs: config.limits.dependency_dirs.iter().cloned().collect(),
            date: None,
        }
    }
}

pub struct AgentLoop {
    layout: VaultLayout,
    builder: Arc<SnapshotBuilder>,
    dispatcher: ToolDispatcherImpl,
    oracle: ActionOracle,
    validator: ActionValidator,
    prompts: PromptBuilder,
    people: PeopleTable,
    audit: Arc<AuditLogger>,
    cooldown: CooldownQueue,
    settings: LoopSettings,
    frontier: VecDeque<PathBuf>,
    stages: HashMap<PathBuf, Stage>,
    inspected: HashMap<PathBuf, u32>,
    listed: HashMap<PathBuf, u32>,
    /// Sources already moved; only matters in dry run where they stay put.
    handled: HashSet<PathBuf>,
    owner_noted: HashSet<PathBuf>,
    cohesion: CohesionTracker,
    trees: Option<(u64, BTreeMap<String, TreeNode>)>,
    memory: MemoryWindow,
    counters: StepCounters,
}

impl AgentLoop {
    pub fn with_settings(
        config: &RunConfig,
        settings: LoopSettings,
        layout: VaultLayout,
        backend: Arc<dyn LlmBackend>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, RuntimeError> {
        let builder = Arc::new(SnapshotBuilder::new(config.limits.snapshot));
        let registry = ToolRegistryImpl::for_vault(&layout, builder.clone())?;
        let policy = config.destination_policy()?;
        let validator = ActionValidator::new(
            layout.clone(),
            policy.clone(),
            config.taxonomy.clone(),
            config.destinations.enforce_taxonomy,
        )?;

        Ok(Self {
            dispatcher: ToolDispatcherImpl::new(Arc::new(registry)),
            oracle: ActionOracle::new(backend, OracleSettings::from_config(&config.oracle)),
            prompts: PromptBuilder::new(&policy),
            people: config.people.clone(),
            cooldown: CooldownQueue::new(config.cooldown_policy()),
            memory: MemoryWindow::new(settings.mem_limit),
            layout,
            builder,
            validator,
            audit,
            settings,
            frontier: VecDeque::new(),
            stages: HashMap::new(),
            inspected: HashMap::new(),
            listed: HashMap::new(),
            handled: HashSet::new(),
            owner_noted: HashSet::new(),
            cohesion: CohesionTracker::new(config.cohesion.clone()),
            trees: None,
            counters: StepCounters::default(),
        })
    }

    /// Fills the frontier with the visible top-level inbox entries.
    pub fn seed(&mut self) -> Result<usize, RuntimeError> {
        let (children, truncated) = self
            .builder
            .visible_children(self.layout.inbox())
            .map_err(|e| RuntimeError::Fatal(format!("Cannot read inbox: {}", e)))?;
        if truncated {
            warn!(
                "Inbox holds more than {} entries; the rest waits for the next run",
                children.len()
            );
        }
        self.frontier = children.into();
        info!("Queued {} inbox items", self.frontier.len());
        Ok(self.frontier.len())
    }

    pub fn counters(&self) -> &StepCounters {
        &self.counters
    }

    pub fn cooldown(&self) -> &CooldownQueue {
        &self.cooldown
    }

    pub fn pending(&self) -> usize {
        self.frontier.len()
    }

    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<LoopExit, RuntimeError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(LoopExit::Interrupted);
            }
            if self.counters.steps >= self.settings.max_steps {
                info!("Step ceiling of {} reached", self.settings.max_steps);
                return Ok(LoopExit::StepCeiling);
            }
            if self.memory.is_stalled() {
                warn!(
                    "No progress in the last {} steps, stopping",
                    self.memory.limit()
                );
                return Ok(LoopExit::Stalled);
            }
            if !self.layout.inbox().is_dir() {
                return Err(RuntimeError::Fatal(format!(
                    "Inbox disappeared: {}",
                    self.layout.inbox().display()
                )));
            }

            let now = Instant::now();
            if let Some(target) = self.next_target(now) {
                self.counters.steps += 1;
                self.step(target, cancel).await;
                continue;
            }

            let earliest = self
                .frontier
                .iter()
                .filter_map(|p| self.cooldown.retry_at(p))
                .min();
            match earliest {
                Some(at) => {
                    debug!("Every pending item is cooling down, waiting");
                    tokio::select! {
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                        _ = cancel.cancelled() => return Ok(LoopExit::Interrupted),
                    }
                }
                None => return Ok(LoopExit::InboxExhausted),
            }
        }
    }

    /// Removes and returns the first eligible frontier item, dropping
    /// permanently skipped ones on the way.
    fn next_target(&mut self, now: Instant) -> Option<PathBuf> {
        let mut idx = 0;
        while idx < self.frontier.len() {
            let path = &self.frontier[idx];
            if self.cooldown.is_skipped(path) {
                self.frontier.remove(idx);
                continue;
            }
            if self.cooldown.is_eligible(path, now) {
                return self.frontier.remove(idx);
            }
            idx += 1;
        }
        None
    }

    async fn step(&mut self, target: PathBuf, cancel: &CancellationToken) {
        let step = self.counters.steps;
        let mut stage = self.stages.get(&target).copied().unwrap_or(Stage::Probe);

        if fs::symlink_metadata(&target).is_err() {
            self.resolved(step, &target, stage, None, 0, "source vanished before the step");
            return;
        }
        if self.is_dependency_path(&target) {
            self.counters.skipped += 1;
            self.handled.insert(target.clone());
            info!("Leaving dependency tree {} in place", self.layout.display(&target));
            self.record(
                step,
                &target,
                stage,
                None,
                0,
                ValidationOutcome::Skipped {
                    reason: "dependency_dir".into(),
                },
                ExecutionOutcome::NotRun,
            );
            return;
        }

        let observation = self.builder.observe(&target);
        if stage == Stage::Probe && self.reads_exhausted(&target, &observation) {
            stage = Stage::Decide;
            self.stages.insert(target.clone(), stage);
        }
        if stage == Stage::Decide {
            self.note_owner(step, &target, &observation.name);
        }

        let trees = match stage {
            Stage::Decide => Some(self.destination_trees(step)),
            Stage::Probe => None,
        };
        let n_predict = match stage {
            Stage::Probe => self.settings.n_predict_probe,
            Stage::Decide => self.settings.n_predict_decide,
        };

        let mut hint: Option<String> = None;
        let mut attempts = 0;
        loop {
            let prompt = self.prompts.build(&PromptContext {
                stage,
                memory: &self.memory,
                target: &observation,
                destination_trees: trees.as_ref(),
                policy_hint: hint.as_deref(),
            });

            let decision = tokio::select! {
                decision = self.oracle.decide(&prompt, n_predict) => Some(decision),
                _ = cancel.cancelled() => None,
            };
            let Some(decision) = decision else {
                self.frontier.push_front(target.clone());
                self.record(
                    step,
                    &target,
                    stage,
                    None,
                    attempts,
                    ValidationOutcome::Skipped {
                        reason: "interrupted".into(),
                    },
                    ExecutionOutcome::NotRun,
                );
                return;
            };
            attempts += decision.attempts();

            let action = match decision {
                Decision::Act { action, .. } => action,
                Decision::Defer { reason, .. } => {
                    self.defer(step, target, stage, reason, attempts);
                    return;
                }
            };

            match self.validator.validate(&action, &target, stage) {
                Ok(validated) => {
                    self.execute(step, target, stage, action, validated, attempts)
                        .await;
                    return;
                }
                Err(err) if stage == Stage::Decide && hint.is_none() => {
                    debug!(
                        "Asking again for {} after rejection: {}",
                        self.layout.display(&target),
                        err
                    );
                    hint = Some(format!(
                        "The previous reply was rejected ({}). Return exactly one plan_move for \
                         CURRENT_TARGET into one of: {}.",
                        err,
                        self.validator.policy().describe()
                    ));
                }
                Err(err) => {
                    self.reject(step, target, stage, &action, &err, attempts);
                    return;
                }
            }
        }
    }

    async fn execute(
        &mut self,
        step: u64,
        target: PathBuf,
        stage: Stage,
        action: Action,
        validated: ValidatedAction,
        attempts: u32,
    ) {
        match validated {
            ValidatedAction::ListDir(dir) => {
                self.expand(step, target, stage, &action, dir, attempts)
                    .await
            }
            ValidatedAction::InspectFile(file) => {
                self.inspect(step, target, stage, &action, file, attempts)
                    .await
            }
            ValidatedAction::PlanMove(plan) => {
                self.commit_move(step, target, stage, &action, plan, attempts)
                    .await
            }
        }
    }

    async fn expand(
        &mut self,
        step: u64,
        target: PathBuf,
        stage: Stage,
        action: &Action,
        dir: PathBuf,
        attempts: u32,
    ) {
        let key = dir.to_string_lossy().into_owned();
        if self.memory.contains_read("list_dir", &key) {
            self.redirect_to_decide(step, target, stage, action, "duplicate_read", attempts);
            return;
        }
        if self.listed.get(&dir).copied().unwrap_or(0) >= self.settings.list_cap {
            self.redirect_to_decide(step, target, stage, action, "list_cap_reached", attempts);
            return;
        }
        if self.has_dependency_marker(&dir) {
            self.redirect_to_decide(step, target, stage, action, "dependency_tree", attempts);
            return;
        }

        let result = self
            .dispatch(step, "list_dir", json!({ "path": dir }))
            .await
            .and_then(decode::<ListDirOutput>);
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                self.fail(step, target, stage, action, e, attempts);
                return;
            }
        };

        *self.listed.entry(dir.clone()).or_insert(0) += 1;
        if output.truncated {
            warn!(
                "Listing of {} truncated; the rest waits for the next run",
                self.layout.display(&dir)
            );
        }

        let mut queued = 0;
        if dir == target {
            let children: Vec<PathBuf> = output
                .entries
                .iter()
                .filter(|p| !self.handled.contains(*p))
                .filter(|p| !self.is_dependency_name(p))
                .cloned()
                .collect();
            queued = children.len();
            for child in children.into_iter().rev() {
                self.frontier.push_front(child);
            }
            self.stages.remove(&target);
            self.cooldown.record_success(&target);
        } else {
            self.frontier.push_front(target.clone());
        }

        self.memory.push(MemoryEntry {
            step,
            tool: "list_dir".into(),
            path: key,
            summary: serde_json::to_value(&output.observation.children)
                .unwrap_or(serde_json::Value::Null),
            progressed: true,
        });
        self.record(
            step,
            &target,
            stage,
            Some(action),
            attempts,
            ValidationOutcome::Accepted,
            ExecutionOutcome::Completed {
                output: json!({
                    "entries": output.entries.len(),
                    "queued": queued,
                    "truncated": output.truncated,
                }),
            },
        );
    }

    async fn inspect(
        &mut self,
        step: u64,
        target: PathBuf,
        stage: Stage,
        action: &Action,
        file: PathBuf,
        attempts: u32,
    ) {
        let key = file.to_string_lossy().into_owned();
        if self.memory.contains_read("inspect_file", &key) {
            self.redirect_to_decide(step, target, stage, action, "duplicate_read", attempts);
            return;
        }
        if self.inspected.get(&file).copied().unwrap_or(0) >= self.settings.inspect_cap {
            self.redirect_to_decide(step, target, stage, action, "inspect_cap_reached", attempts);
            return;
        }

        let result = self
            .dispatch(step, "inspect_file", json!({ "path": file }))
            .await
            .and_then(decode::<Observation>);
        let observation = match result {
            Ok(observation) => observation,
            Err(e) => {
                self.fail(step, target, stage, action, e, attempts);
                return;
            }
        };

        *self.inspected.entry(file.clone()).or_insert(0) += 1;
        self.memory.push(MemoryEntry {
            step,
            tool: "inspect_file".into(),
            path: key,
            summary: slim(&observation),
            progressed: true,
        });
        if let Some(excerpt) = &observation.excerpt {
            self.note_owner(step, &file, excerpt);
        }

        if file == target {
            self.stages.insert(target.clone(), Stage::Decide);
        }
        self.frontier.push_front(target.clone());

        self.record(
            step,
            &target,
            stage,
            Some(action),
            attempts,
            ValidationOutcome::Accepted,
            ExecutionOutcome::Completed {
                output: json!({
                    "size": observation.size,
                    "excerpt": observation.excerpt.is_some(),
                }),
            },
        );
    }

    async fn commit_move(
        &mut self,
        step: u64,
        target: PathBuf,
        stage: Stage,
        action: &Action,
        plan: MovePlan,
        attempts: u32,
    ) {
        let plan = match self.cohesive_plan(&plan) {
            Some(folder_plan) => folder_plan,
            None => plan,
        };
        if !plan.notes.is_empty() {
            debug!("Move normalized: {:?}", plan.notes);
        }
        let input = match serde_json::to_value(plan.to_request()) {
            Ok(input) => input,
            Err(e) => {
                self.fail(
                    step,
                    target,
                    stage,
                    action,
                    ToolError::ExecutionFailed(e.to_string()),
                    attempts,
                );
                return;
            }
        };

        let result = self
            .dispatch(step, "plan_move", input)
            .await
            .and_then(decode::<MoveRecord>);

        let record = match result {
            Ok(record) => record,
            Err(ToolError::SourceVanished(_)) => {
                self.retire(&plan.source);
                if !target.starts_with(&plan.source) {
                    self.frontier.push_front(target.clone());
                }
                self.resolved(
                    step,
                    &target,
                    stage,
                    Some(action),
                    attempts,
                    "source vanished before the move",
                );
                return;
            }
            Err(e) => {
                self.fail(step, target, stage, action, e, attempts);
                return;
            }
        };

        self.counters.moves += 1;
        crate::metrics::increment_moves();
        self.retire(&plan.source);
        if !target.starts_with(&plan.source) {
            self.frontier.push_front(target.clone());
        }
        self.trees = None;

        self.memory.push(MemoryEntry {
            step,
            tool: "plan_move".into(),
            path: plan.source.to_string_lossy().into_owned(),
            summary: json!({ "destination": self.layout.display(&record.destination) }),
            progressed: true,
        });
        self.record(
            step,
            &target,
            stage,
            Some(action),
            attempts,
            ValidationOutcome::Accepted,
            ExecutionOutcome::Completed {
                output: serde_json::to_value(&record).unwrap_or(serde_json::Value::Null),
            },
        );
    }

    /// The move of a file's inbox folder, once the file's siblings agree on
    /// where that folder belongs.
    fn cohesive_plan(&mut self, plan: &MovePlan) -> Option<MovePlan> {
        let is_file = fs::symlink_metadata(&plan.source)
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return None;
        }
        let parent = plan.source.parent()?;
        if parent == self.layout.inbox()
            || !parent.starts_with(self.layout.inbox())
            || self.is_dependency_path(parent)
        {
            return None;
        }

        let vote = Vote {
            root: plan.destination_root,
            subpath: plan.segments.join("/"),
        };
        let consensus = self.cohesion.note(parent, &plan.source, vote)?;
        let action = Action::PlanMove {
            src: Some(parent.to_string_lossy().into_owned()),
            destination_root: consensus.root.label().to_string(),
            subpath: Some(consensus.subpath).filter(|s| !s.is_empty()),
            filename: None,
        };
        match self.validator.validate(&action, parent, Stage::Decide) {
            Ok(ValidatedAction::PlanMove(mut folder_plan)) => {
                info!(
                    "Siblings agree; moving {} as a whole",
                    self.layout.display(parent)
                );
                self.counters.escalations += 1;
                folder_plan.notes.push("folder_cohesion");
                Some(folder_plan)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "Could not move {} as a whole: {}",
                    self.layout.display(parent),
                    e
                );
                None
            }
        }
    }

    /// Forgets everything queued at or below a moved source.
    fn retire(&mut self, source: &Path) {
        self.frontier.retain(|p| !p.starts_with(source));
        self.stages.retain(|p, _| !p.starts_with(source));
        self.inspected.retain(|p, _| !p.starts_with(source));
        self.listed.retain(|p, _| !p.starts_with(source));
        self.cooldown.forget_under(source);
        self.handled.insert(source.to_path_buf());
    }

    fn redirect_to_decide(
        &mut self,
        step: u64,
        target: PathBuf,
        stage: Stage,
        action: &Action,
        reason: &str,
        attempts: u32,
    ) {
        debug!(
            "{} for {}, switching to decide",
            reason,
            self.layout.display(&target)
        );
        self.counters.rejections += 1;
        crate::metrics::increment_rejections();
        self.stages.insert(target.clone(), Stage::Decide);
        self.frontier.push_front(target.clone());
        self.remember_failure(step, "rejected", &target, reason);
        self.record(
            step,
            &target,
            stage,
            Some(action),
            attempts,
            ValidationOutcome::Rejected {
                reason: reason.to_string(),
            },
            ExecutionOutcome::NotRun,
        );
    }

    fn reject(
        &mut self,
        step: u64,
        target: PathBuf,
        stage: Stage,
        action: &Action,
        err: &ValidationError,
        attempts: u32,
    ) {
        warn!(
            "Rejected {} for {}: {}",
            action.tool_name(),
            self.layout.display(&target),
            err
        );
        self.counters.rejections += 1;
        crate::metrics::increment_rejections();
        let reason = format!("{}: {}", err.code(), err);
        self.remember_failure(step, "rejected", &target, &reason);
        self.record(
            step,
            &target,
            stage,
            Some(action),
            attempts,
            ValidationOutcome::Rejected {
                reason: reason.clone(),
            },
            ExecutionOutcome::NotRun,
        );
        let verdict = self.cooldown.record_failure(&target, reason, Instant::now());
        self.requeue(target, verdict);
    }

    fn defer(&mut self, step: u64, target: PathBuf, stage: Stage, reason: String, attempts: u32) {
        warn!(
            "Oracle gave no usable action for {}: {}",
            self.layout.display(&target),
            reason
        );
        self.counters.deferrals += 1;
        crate::metrics::increment_deferrals();
        self.remember_failure(step, "deferred", &target, &reason);
        self.record(
            step,
            &target,
            stage,
            None,
            attempts,
            ValidationOutcome::Deferred {
                reason: reason.clone(),
                attempts,
            },
            ExecutionOutcome::NotRun,
        );
        let verdict = self.cooldown.record_failure(&target, reason, Instant::now());
        self.requeue(target, verdict);
    }

    fn fail(
        &mut self,
        step: u64,
        target: PathBuf,
        stage: Stage,
        action: &Action,
        err: ToolError,
        attempts: u32,
    ) {
        error!(
            "{} failed for {}: {}",
            action.tool_name(),
            self.layout.display(&target),
            err
        );
        self.counters.failures += 1;
        let reason = err.to_string();
        self.remember_failure(step, "failed", &target, &reason);
        self.record(
            step,
            &target,
            stage,
            Some(action),
            attempts,
            ValidationOutcome::Accepted,
            ExecutionOutcome::Failed {
                kind: err.kind().to_string(),
                error: reason.clone(),
            },
        );
        let verdict = self.cooldown.record_failure(&target, reason, Instant::now());
        self.requeue(target, verdict);
    }

    fn resolved(
        &mut self,
        step: u64,
        target: &Path,
        stage: Stage,
        action: Option<&Action>,
        attempts: u32,
        reason: &str,
    ) {
        info!("{}: {}", reason, self.layout.display(target));
        self.counters.resolved += 1;
        self.cooldown.forget_under(target);
        self.record(
            step,
            target,
            stage,
            action,
            attempts,
            ValidationOutcome::Accepted,
            ExecutionOutcome::AlreadyResolved {
                reason: reason.to_string(),
            },
        );
    }

    fn requeue(&mut self, target: PathBuf, verdict: CooldownVerdict) {
        match verdict {
            CooldownVerdict::RetryAt(_) => self.frontier.push_back(target),
            CooldownVerdict::PermanentlySkipped => {
                warn!(
                    "Giving up on {} for this run",
                    self.layout.display(&target)
                );
                crate::metrics::increment_permanent_skips();
            }
        }
    }

    fn remember_failure(&mut self, step: u64, tool: &str, target: &Path, reason: &str) {
        self.memory.push(MemoryEntry {
            step,
            tool: tool.to_string(),
            path: target.to_string_lossy().into_owned(),
            summary: json!({ "reason": reason }),
            progressed: false,
        });
    }

    /// Adds an owner hint to memory the first time a person matches `text`.
    fn note_owner(&mut self, step: u64, path: &Path, text: &str) {
        if self.people.is_empty() || self.owner_noted.contains(path) {
            return;
        }
        let Some(label) = self.people.match_label(text) else {
            return;
        };
        let label = label.to_string();
        debug!("Owner hint for {}: {}", self.layout.display(path), label);
        self.owner_noted.insert(path.to_path_buf());
        self.memory.push(MemoryEntry {
            step,
            tool: "owner_hint".into(),
            path: path.to_string_lossy().into_owned(),
            summary: json!({ "owner": label }),
            progressed: false,
        });
    }

    /// Whether the probe stage has nothing left to offer for this item.
    fn reads_exhausted(&self, target: &Path, observation: &Observation) -> bool {
        match observation.kind {
            EntryKind::File => {
                self.inspected.get(target).copied().unwrap_or(0) >= self.settings.inspect_cap
            }
            EntryKind::Dir => {
                self.listed.get(target).copied().unwrap_or(0) >= self.settings.list_cap
            }
            _ => false,
        }
    }

    fn destination_trees(&mut self, step: u64) -> BTreeMap<String, TreeNode> {
        if let Some((built_at, trees)) = &self.trees {
            if step < built_at + self.settings.tree_ttl_steps {
                return trees.clone();
            }
        }
        let mut trees = BTreeMap::new();
        for root in self.validator.policy().roots() {
            let node = self.builder.destination_tree(
                &self.layout.root_dir(root),
                self.settings.tree_depth.for_root(root),
                self.settings.tree_dir_cap,
            );
            trees.insert(root.label().to_string(), node);
        }
        self.trees = Some((step, trees.clone()));
        trees
    }

    fn is_dependency_name(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| self.settings.dependency_dirs.contains(n.to_string_lossy().as_ref()))
            .unwrap_or(false)
    }

    /// Inside a dependency or build tree, judged from the path below INBOX.
    fn is_dependency_path(&self, path: &Path) -> bool {
        self.layout
            .relative_to_inbox(path)
            .map(|rel| {
                rel.components().any(|c| {
                    self.settings
                        .dependency_dirs
                        .contains(c.as_os_str().to_string_lossy().as_ref())
                })
            })
            .unwrap_or(false)
    }

    /// `dir` is a dependency tree itself or directly holds one.
    fn has_dependency_marker(&self, dir: &Path) -> bool {
        if self.is_dependency_name(dir) {
            return true;
        }
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| self.is_dependency_name(&e.path()))
            })
            .unwrap_or(false)
    }

    async fn dispatch(
        &self,
        step: u64,
        tool: &str,
        input: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let _timer = MetricTimer::new("tool_execution_latency");
        self.dispatcher.dispatch(self.context(step), tool, input).await
    }

    fn context(&self, step: u64) -> ExecutionContext {
        let ctx = ExecutionContext::new(step, self.settings.dry_run, self.settings.tool_timeout_ms);
        match self.settings.date {
            Some(date) => ctx.with_date(date),
            None => ctx,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        step: u64,
        target: &Path,
        stage: Stage,
        action: Option<&Action>,
        attempts: u32,
        validation: ValidationOutcome,
        execution: ExecutionOutcome,
    ) {
        let record = StepRecord {
            step,
            target: self.layout.display(target),
            stage,
            action: action.map(Action::to_value),
            oracle_attempts: attempts,
            validation,
            execution,
        };
        if let Err(e) = self.audit.record(AuditEvent::Step(record)) {
            error!("Audit write failed at step {}: {}", step, e);
        }
    }
}

fn decode<T: DeserializeOwned>(result: ToolResult) -> Result<T, ToolError> {
    let output = result
        .output
        .ok_or_else(|| ToolError::ExecutionFailed("tool returned no output".into()))?;
    serde_json::from_value(output).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
}

/// Compact form of an inspection kept in memory.
fn slim(observation: &Observation) -> serde_json::Value {
    json!({
        "name": observation.name,
        "size": observation.size,
        "ext": observation.ext,
        "group": observation.group,
        "excerpt": observation.excerpt.as_deref().map(|e| head(e, EXCERPT_IN_MEMORY)),
        "png_asset_hint": observation.png_asset_hint,
    })
}
