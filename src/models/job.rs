use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::JobStatus;

/// One pipeline run of a single component. Jobs live in memory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub component_id: String,
    pub status: JobStatus,
    pub logs: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            component_id: component_id.into(),
            status: JobStatus::Running,
            logs: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to a terminal status. Returns false and leaves the job untouched
    /// when it already finished.
    pub fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        self.status = status;
        self.finished_at = Some(now);
        true
    }
}
