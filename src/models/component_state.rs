use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::ComponentStatus;

/// Live state of one catalog component.
///
/// One instance exists per component for the whole process lifetime; cleanup
/// resets it in place rather than removing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ComponentState {
    pub status: ComponentStatus,
    pub route: Option<String>,
    /// Raw output of the current or last run; never persisted
    pub logs: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub namespace: Option<String>,
}

impl ComponentState {
    /// Reset for a new pipeline run
    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        self.status = ComponentStatus::Deploying;
        self.logs.clear();
        self.error = None;
        self.started_at = Some(now);
        self.finished_at = None;
    }

    /// Record the terminal outcome of a pipeline run
    pub fn finish_run(
        &mut self,
        success: bool,
        route: Option<String>,
        namespace: &str,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = if success {
            ComponentStatus::Deployed
        } else {
            ComponentStatus::Failed
        };
        self.route = route;
        self.namespace = Some(namespace.to_string());
        self.error = if success { None } else { error };
        self.finished_at = Some(now);
    }

    /// Record a fault that aborted the pipeline
    pub fn fail_with(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = ComponentStatus::Failed;
        self.error = Some(message.into());
        self.finished_at = Some(now);
    }

    /// Back to defaults after the namespace was removed
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Copy suitable for durable storage
    pub fn without_logs(&self) -> Self {
        Self {
            logs: String::new(),
            ..self.clone()
        }
    }
}
