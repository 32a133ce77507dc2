//! Runtime controller - main entry point for a sorting run.
//!
//! A run walks `Starting → Running → Draining → Stopped`. Every way out of
//! `Running`, including interrupts and fatal errors, goes through `Draining`
//! so the inbox is tidied and the audit log is finalized.

use crate::agent_loop::{AgentLoop, LoopExit, LoopSettings, StepCounters};
use crate::cleanup::{remove_empty_dirs, Flattener};
use crate::interfaces::{LlmBackend, RuntimeError};
use crate::intake::{stage_intake_roots, IntakeReport};
use crate::metrics::MetricTimer;
use crate::run_config::RunConfig;
use chrono::NaiveDate;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vault_sort::infra::{AuditEvent, AuditLogger, RunSummaryRecord};
use vault_sort_tools::VaultLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    StepCeiling,
    Stalled,
    InboxExhausted,
    Interrupted,
    Fatal(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::StepCeiling => write!(f, "step_ceiling"),
            StopReason::Stalled => write!(f, "stalled"),
            StopReason::InboxExhausted => write!(f, "inbox_exhausted"),
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

impl From<LoopExit> for StopReason {
    fn from(exit: LoopExit) -> Self {
        match exit {
            LoopExit::StepCeiling => StopReason::StepCeiling,
            LoopExit::Stalled => StopReason::Stalled,
            LoopExit::InboxExhausted => StopReason::InboxExhausted,
            LoopExit::Interrupted => StopReason::Interrupted,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: StepCounters,
    pub permanently_skipped: Vec<PathBuf>,
    pub intake_moved: usize,
    pub intake_failed: usize,
    pub flattened: usize,
    pub removed_dirs: usize,
    pub stop_reason: StopReason,
    pub duration: Duration,
}

impl RunSummary {
    pub fn to_record(&self, layout: &VaultLayout) -> RunSummaryRecord {
        RunSummaryRecord {
            steps: self.counters.steps,
            moves: self.counters.moves,
            rejections: self.counters.rejections,
            deferrals: self.counters.deferrals,
            failures: self.counters.failures,
            permanently_skipped: self
                .permanently_skipped
                .iter()
                .map(|p| layout.display(p))
                .collect(),
            stop_reason: self.stop_reason.to_string(),
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

/// Main runtime controller.
pub struct RuntimeController {
    config: RunConfig,
    layout: VaultLayout,
    backend: Arc<dyn LlmBackend>,
    audit: Arc<AuditLogger>,
    phase: RunPhase,
    date: Option<NaiveDate>,
    started: Instant,
    intake: IntakeReport,
    counters: StepCounters,
    permanently_skipped: Vec<PathBuf>,
    summary: Option<RunSummary>,
}

impl RuntimeController {
    /// Create a controller for one run.
    ///
    /// # Arguments
    /// * `config` - Validated here; the vault root must already exist
    /// * `backend` - Completion backend the oracle talks to
    /// * `audit` - Log that receives every step and the final summary
    pub fn new(
        config: RunConfig,
        backend: Arc<dyn LlmBackend>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let layout = VaultLayout::new(&config.vault.root)?;
        Ok(Self {
            config,
            layout,
            backend,
            audit,
            phase: RunPhase::Starting,
            date: None,
            started: Instant::now(),
            intake: IntakeReport::default(),
            counters: StepCounters::default(),
            permanently_skipped: Vec::new(),
            summary: None,
        })
    }

    /// Pins the breadcrumb date instead of using today.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    /// Execute the whole run.
    ///
    /// # Returns
    /// The run summary, or the fatal error that ended the run. The vault is
    /// drained and the audit log finalized in both cases.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, RuntimeError> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        let _timer = MetricTimer::new("run_duration");
        self.started = Instant::now();

        let outcome = self.start_and_loop(cancel).await;
        match outcome {
            Ok(exit) => Ok(self.drain(exit.into())),
            Err(e) => {
                error!("Run aborted: {}", e);
                self.drain(StopReason::Fatal(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_and_loop(&mut self, cancel: &CancellationToken) -> Result<LoopExit, RuntimeError> {
        self.phase = RunPhase::Starting;
        info!(
            "Starting run over {}{}",
            self.layout.root().display(),
            if self.config.dry_run { " (dry run)" } else { "" }
        );
        self.layout.ensure().map_err(|e| {
            RuntimeError::Fatal(format!(
                "Cannot prepare vault {}: {}",
                self.layout.root().display(),
                e
            ))
        })?;

        self.intake = stage_intake_roots(&self.config.intake.roots, &self.layout, self.config.dry_run);
        for staged in &self.intake.moves {
            self.audit_event(AuditEvent::Intake {
                source: staged.source.display().to_string(),
                destination: staged.destination.as_ref().map(|d| self.layout.display(d)),
                error: staged.error.clone(),
            });
        }

        let mut settings = LoopSettings::from_config(&self.config);
        settings.date = self.date;
        let mut agent_loop = AgentLoop::with_settings(
            &self.config,
            settings,
            self.layout.clone(),
            self.backend.clone(),
            self.audit.clone(),
        )?;
        let queued = agent_loop.seed()?;
        self.audit_event(AuditEvent::RunStarted {
            inbox: self.layout.inbox().display().to_string(),
            queue_size: queued,
            dry_run: self.config.dry_run,
            max_steps: self.config.limits.max_steps,
        });

        self.phase = RunPhase::Running;
        let exit = agent_loop.run(cancel).await;

        self.counters = agent_loop.counters().clone();
        self.permanently_skipped = agent_loop.cooldown().permanently_skipped();
        if agent_loop.pending() > 0 {
            info!("{} items left in the inbox for the next run", agent_loop.pending());
        }
        exit
    }

    /// Flattens wrapper folders, prunes empty directories and finalizes the
    /// audit log. Only the first call does work; later calls return the same
    /// summary.
    pub fn drain(&mut self, reason: StopReason) -> RunSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }
        self.phase = RunPhase::Draining;
        info!("Draining after stop: {}", reason);

        let inbox = self.layout.inbox().to_path_buf();
        let mut flattened = Vec::new();
        if self.config.cleanup.flatten.enabled && inbox.is_dir() {
            match Flattener::new(self.config.cleanup.flatten.clone(), self.config.people.clone()) {
                Ok(flattener) => flattened = flattener.apply(&inbox, self.config.dry_run),
                Err(e) => warn!("Skipping flatten: {}", e),
            }
        }
        let removed_dirs = if self.config.cleanup.remove_empty_dirs && inbox.is_dir() {
            remove_empty_dirs(&inbox)
        } else {
            0
        };
        self.audit_event(AuditEvent::Cleanup {
            flattened: flattened
                .iter()
                .map(|f| self.layout.display(&f.wrapper))
                .collect(),
            removed_dirs,
        });

        let summary = RunSummary {
            counters: self.counters.clone(),
            permanently_skipped: self.permanently_skipped.clone(),
            intake_moved: self.intake.moved(),
            intake_failed: self.intake.failed(),
            flattened: flattened.len(),
            removed_dirs,
            stop_reason: reason,
            duration: self.started.elapsed(),
        };
        if let Err(e) = self.audit.finalize(summary.to_record(&self.layout)) {
            error!("Failed to finalize audit log: {}", e);
        }

        info!(
            "Run stopped ({}): {} steps, {} moves, {} rejections, {} deferrals, {} failures",
            summary.stop_reason,
            summary.counters.steps,
            summary.counters.moves,
            summary.counters.rejections,
            summary.counters.deferrals,
            summary.counters.failures
        );
        self.phase = RunPhase::Stopped;
        self.summary = Some(summary.clone());
        summary
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            error!("Audit write failed: {}", e);
        }
    }
}
