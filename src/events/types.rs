use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::events as names;
use crate::models::{ComponentState, MaskedConfig};

/// Which batch an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchScope {
    All,
    Offer(String),
}

impl std::fmt::Display for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Offer(id) => write!(f, "offer:{id}"),
        }
    }
}

/// Every state transition the orchestrator reports to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeployEvent {
    ComponentUpdate {
        component_id: String,
        data: ComponentState,
    },
    ConfigUpdate {
        data: MaskedConfig,
    },
    JobStart {
        job_id: Uuid,
        component_id: String,
    },
    JobOutput {
        job_id: Uuid,
        component_id: String,
        data: String,
    },
    JobComplete {
        job_id: Uuid,
        component_id: String,
        success: bool,
    },
    JobError {
        job_id: Uuid,
        component_id: String,
        error: String,
    },
    BatchStopped {
        scope: BatchScope,
        component_id: String,
        component_name: String,
        reason: String,
    },
    BatchComplete {
        scope: BatchScope,
        total: usize,
    },
    CleanupOutput {
        data: String,
    },
    CleanupComplete {
        success: bool,
        summary: String,
    },
    RefreshComplete,
}

impl DeployEvent {
    /// Wire tag of the event, as serialized in the `type` field
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ComponentUpdate { .. } => names::COMPONENT_UPDATE,
            Self::ConfigUpdate { .. } => names::CONFIG_UPDATE,
            Self::JobStart { .. } => names::JOB_START,
            Self::JobOutput { .. } => names::JOB_OUTPUT,
            Self::JobComplete { .. } => names::JOB_COMPLETE,
            Self::JobError { .. } => names::JOB_ERROR,
            Self::BatchStopped { .. } => names::BATCH_STOPPED,
            Self::BatchComplete { .. } => names::BATCH_COMPLETE,
            Self::CleanupOutput { .. } => names::CLEANUP_OUTPUT,
            Self::CleanupComplete { .. } => names::CLEANUP_COMPLETE,
            Self::RefreshComplete => names::REFRESH_COMPLETE,
        }
    }

    /// Job the event belongs to, if any
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::JobStart { job_id, .. }
            | Self::JobOutput { job_id, .. }
            | Self::JobComplete { job_id, .. }
            | Self::JobError { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}
