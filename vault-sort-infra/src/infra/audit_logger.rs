use crate::infra::contracts::{AuditEntry, AuditEvent, RunSummaryRecord};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditLoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt audit line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

struct LogState {
    file: File,
    seq: u64,
    finalized: bool,
}

/// Append-only JSONL log, one fsynced line per entry.
pub struct AuditLogger {
    log_path: PathBuf,
    run_id: String,
    state: Mutex<LogState>,
}

impl AuditLogger {
    pub fn new<P: AsRef<Path>>(
        log_path: P,
        run_id: impl Into<String>,
    ) -> Result<Self, AuditLoggerError> {
        let log_path = log_path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            log_path,
            run_id: run_id.into(),
            state: Mutex::new(LogState {
                file,
                seq: 0,
                finalized: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stamps and appends one event. Entries after `finalize` are still written.
    pub fn record(&self, event: AuditEvent) -> Result<(), AuditLoggerError> {
        let mut state = self.state.lock();
        state.seq += 1;
        let entry = AuditEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            run_id: self.run_id.clone(),
            seq: state.seq,
            event,
        };
        Self::write_line(&mut state.file, &entry)
    }

    /// Writes the run summary once. Later calls only flush.
    pub fn finalize(&self, summary: RunSummaryRecord) -> Result<(), AuditLoggerError> {
        {
            let state = self.state.lock();
            if state.finalized {
                state.file.sync_all()?;
                return Ok(());
            }
        }
        self.record(AuditEvent::RunFinished(summary))?;
        self.state.lock().finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    fn write_line(file: &mut File, entry: &AuditEntry) -> Result<(), AuditLoggerError> {
        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Reads a log back. A torn final line from an abrupt stop is dropped;
/// damage anywhere else is an error.
pub fn read_entries<P: AsRef<Path>>(path: P) -> Result<Vec<AuditEntry>, AuditLoggerError> {
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
    let last = lines.len().saturating_sub(1);

    let mut entries = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(_) if idx == last => break,
            Err(e) => {
                return Err(AuditLoggerError::Corrupt {
                    line: idx + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(entries)
}
