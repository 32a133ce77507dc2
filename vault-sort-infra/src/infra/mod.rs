pub mod audit_logger;
pub mod contracts;
pub mod cooldown_queue;

pub use audit_logger::{read_entries, AuditLogger, AuditLoggerError};
pub use contracts::{
    AuditEntry, AuditEvent, ExecutionOutcome, RunSummaryRecord, Stage, StepRecord,
    ValidationOutcome,
};
pub use cooldown_queue::{CooldownPolicy, CooldownQueue, CooldownVerdict, QueueItem};
