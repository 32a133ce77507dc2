use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub step: u64,
    pub dry_run: bool,
    /// Date of the breadcrumb folder a move writes into.
    pub date: NaiveDate,
    pub timeout_ms: u64,
    pub audit_ref: String,
}

impl ExecutionContext {
    pub fn new(step: u64, dry_run: bool, timeout_ms: u64) -> Self {
        Self {
            step,
            dry_run,
            date: chrono::Local::now().date_naive(),
            timeout_ms,
            audit_ref: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }
}
