//! # Batch Orchestrator
//!
//! Runs a linear schedule of components one at a time, waiting for each job
//! to reach a terminal status before starting the next. A required component
//! that fails stops the batch; any other failure is recorded and the batch
//! continues.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::ComponentDefinition;
use crate::error::Result;
use crate::events::{BatchScope, DeployEvent, EventBroadcaster};
use crate::state_machine::JobStatus;

/// Starts single-component pipelines and waits on their jobs
#[async_trait]
pub trait JobLauncher: Send + Sync {
    fn start_deploy(&self, component_id: &str) -> Result<Uuid>;

    async fn wait_for_job(&self, job_id: Uuid) -> Option<JobStatus>;
}

/// Outcome of one scheduled component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub component_id: String,
    pub job_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    /// Set when the pipeline could not be started
    pub error: Option<String>,
}

impl BatchEntry {
    fn failed(&self) -> bool {
        self.error.is_some() || self.status != Some(JobStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub scope: BatchScope,
    pub entries: Vec<BatchEntry>,
    /// Required component that stopped the batch
    pub stopped_at: Option<String>,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| !e.failed()).count()
    }
}

pub struct BatchOrchestrator<L: JobLauncher> {
    launcher: L,
    broadcaster: Arc<EventBroadcaster>,
}

impl<L: JobLauncher> BatchOrchestrator<L> {
    pub fn new(launcher: L, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            launcher,
            broadcaster,
        }
    }

    pub async fn run(&self, scope: BatchScope, schedule: Vec<ComponentDefinition>) -> BatchReport {
        info!(scope = %scope, components = schedule.len(), "Starting batch");
        let mut report = BatchReport {
            scope: scope.clone(),
            entries: Vec::with_capacity(schedule.len()),
            stopped_at: None,
        };

        for component in &schedule {
            let entry = match self.launcher.start_deploy(&component.id) {
                Ok(job_id) => BatchEntry {
                    component_id: component.id.clone(),
                    job_id: Some(job_id),
                    status: self.launcher.wait_for_job(job_id).await,
                    error: None,
                },
                Err(e) => {
                    warn!(component_id = %component.id, error = %e, "Batch could not start component");
                    BatchEntry {
                        component_id: component.id.clone(),
                        job_id: None,
                        status: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            let failed = entry.failed();
            report.entries.push(entry);

            if failed && component.required {
                let reason = format!("Required component failed: {}", component.name);
                warn!(scope = %scope, component_id = %component.id, "{reason}");
                self.broadcaster.publish(&DeployEvent::BatchStopped {
                    scope: scope.clone(),
                    component_id: component.id.clone(),
                    component_name: component.name.clone(),
                    reason,
                });
                report.stopped_at = Some(component.id.clone());
                return report;
            }
        }

        info!(
            scope = %scope,
            attempted = report.attempted(),
            succeeded = report.succeeded(),
            "Batch complete"
        );
        self.broadcaster.publish(&DeployEvent::BatchComplete {
            scope,
            total: report.attempted(),
        });
        report
    }
}
