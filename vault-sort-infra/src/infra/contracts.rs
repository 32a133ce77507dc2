use serde::{Deserialize, Serialize};

/// Which decision stage an inbox item is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The oracle may look around (list, inspect) or move right away.
    Probe,
    /// The oracle must produce a move.
    Decide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted,
    Rejected { reason: String },
    Deferred { reason: String, attempts: u32 },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    NotRun,
    Completed { output: serde_json::Value },
    Failed { kind: String, error: String },
    AlreadyResolved { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u64,
    pub target: String,
    pub stage: Stage,
    /// The action as the oracle proposed it, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<serde_json::Value>,
    #[serde(default)]
    pub oracle_attempts: u32,
    pub validation: ValidationOutcome,
    pub execution: ExecutionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummaryRecord {
    pub steps: u64,
    pub moves: u64,
    pub rejections: u64,
    pub deferrals: u64,
    pub failures: u64,
    pub permanently_skipped: Vec<String>,
    pub stop_reason: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        inbox: String,
        queue_size: usize,
        dry_run: bool,
        max_steps: u64,
    },
    Intake {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Step(StepRecord),
    Cleanup {
        flattened: Vec<String>,
        removed_dirs: usize,
    },
    RunFinished(RunSummaryRecord),
}

/// One self-contained line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub run_id: String,
    pub seq: u64,
    pub event: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_wire_shape() {
        let entry = AuditEntry {
            timestamp: "2024-05-01T10:00:00Z".into(),
            run_id: "r1".into(),
            seq: 3,
            event: AuditEvent::Step(StepRecord {
                step: 2,
                target: "INBOX/a.pdf".into(),
                stage: Stage::Decide,
                action: Some(json!({"tool": "plan_move"})),
                oracle_attempts: 1,
                validation: ValidationOutcome::Rejected {
                    reason: "destination not allowed".into(),
                },
                execution: ExecutionOutcome::NotRun,
            }),
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["event"]["event"], "step");
        assert_eq!(value["event"]["stage"], "decide");
        assert_eq!(value["event"]["validation"]["status"], "rejected");
        assert_eq!(value["event"]["execution"]["status"], "not_run");

        let back: AuditEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }
}
