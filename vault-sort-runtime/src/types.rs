//! Core types shared by the oracle, the validator and the agent loop.

use serde::{Deserialize, Serialize};

/// One action as the oracle proposed it. Nothing here is trusted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Action {
    ListDir {
        #[serde(default)]
        path: Option<String>,
    },
    InspectFile {
        #[serde(default)]
        path: Option<String>,
    },
    PlanMove {
        #[serde(default, alias = "source")]
        src: Option<String>,
        #[serde(alias = "root")]
        destination_root: String,
        #[serde(default, alias = "destination_subpath")]
        subpath: Option<String>,
        #[serde(default, alias = "rename")]
        filename: Option<String>,
    },
}

impl Action {
    pub fn tool_name(&self) -> &'static str {
        match self {
            Action::ListDir { .. } => "list_dir",
            Action::InspectFile { .. } => "inspect_file",
            Action::PlanMove { .. } => "plan_move",
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Action::PlanMove { .. })
    }

    /// Serialized form recorded in the audit log.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Result of a single oracle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Action(Action),
    ParseFailure { reason: String, raw_head: String },
    Timeout,
    Unavailable(String),
}

impl AttemptOutcome {
    /// Short label for logs and deferral reasons.
    pub fn reason(&self) -> String {
        match self {
            AttemptOutcome::Action(_) => "ok".to_string(),
            AttemptOutcome::ParseFailure { reason, .. } => format!("parse_failure: {}", reason),
            AttemptOutcome::Timeout => "timeout".to_string(),
            AttemptOutcome::Unavailable(msg) => format!("unavailable: {}", msg),
        }
    }
}

/// What the oracle settled on after its bounded retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Act { action: Action, attempts: u32 },
    Defer { reason: String, attempts: u32 },
}

impl Decision {
    pub fn attempts(&self) -> u32 {
        match self {
            Decision::Act { attempts, .. } | Decision::Defer { attempts, .. } => *attempts,
        }
    }
}
