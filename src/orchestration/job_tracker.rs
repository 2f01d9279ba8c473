//! # Job Tracker
//!
//! In-memory registry of every [`Job`] created during the process lifetime.
//! Jobs are never evicted. Each job carries a `watch` channel mirroring its
//! status so that waiters are woken on completion instead of polling.
//!
//! ```rust
//! use deployer_core::orchestration::JobTracker;
//! use deployer_core::JobStatus;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let jobs = JobTracker::new();
//! let job = jobs.create("web");
//! jobs.append_log(job.job_id, "building\n");
//! assert!(jobs.finish(job.job_id, JobStatus::Completed));
//!
//! let status = jobs.wait_for_terminal(job.job_id, Duration::from_millis(10)).await;
//! assert_eq!(status, Some(JobStatus::Completed));
//! # });
//! ```

use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Job;
use crate::state_machine::JobStatus;

struct JobEntry {
    job: Job,
    status_tx: watch::Sender<JobStatus>,
}

#[derive(Default)]
pub struct JobTracker {
    jobs: DashMap<Uuid, JobEntry>,
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running job for `component_id`
    pub fn create(&self, component_id: &str) -> Job {
        let job = Job::new(component_id);
        let (status_tx, _) = watch::channel(job.status);
        self.jobs.insert(
            job.job_id,
            JobEntry {
                job: job.clone(),
                status_tx,
            },
        );
        debug!(job_id = %job.job_id, component_id = %component_id, "Job created");
        job
    }

    pub fn append_log(&self, job_id: Uuid, chunk: &str) {
        if let Some(mut entry) = self.jobs.get_mut(&job_id) {
            entry.job.logs.push_str(chunk);
        }
    }

    /// Move a job to its terminal status. Returns false if the job is unknown
    /// or already finished.
    pub fn finish(&self, job_id: Uuid, status: JobStatus) -> bool {
        let Some(mut entry) = self.jobs.get_mut(&job_id) else {
            warn!(job_id = %job_id, "Attempted to finish unknown job");
            return false;
        };
        if !entry.job.finish(status, Utc::now()) {
            return false;
        }
        entry.status_tx.send_replace(status);
        true
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.get(&job_id).map(|entry| entry.job.clone())
    }

    /// Every job, oldest first
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    pub fn watch(&self, job_id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        self.jobs.get(&job_id).map(|entry| entry.status_tx.subscribe())
    }

    /// Wait until the job reaches a terminal status.
    ///
    /// Woken by the job's status channel; `tick` bounds how long a missed
    /// notification can delay the wait. Returns `None` for an unknown job.
    pub async fn wait_for_terminal(&self, job_id: Uuid, tick: Duration) -> Option<JobStatus> {
        let mut rx = self.watch(job_id)?;
        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return Some(current);
            }
            // Re-read from the table as well; the sender lives in the entry
            if let Some(job) = self.get(job_id) {
                if job.status.is_terminal() {
                    return Some(job.status);
                }
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return self.get(job_id).map(|job| job.status);
                    }
                }
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_create_append_and_finish() {
        let tracker = JobTracker::new();
        let job = tracker.create("web");
        tracker.append_log(job.job_id, "line 1\n");
        tracker.append_log(job.job_id, "line 2\n");

        assert!(tracker.finish(job.job_id, JobStatus::Completed));
        assert!(!tracker.finish(job.job_id, JobStatus::Failed));

        let stored = tracker.get(job.job_id).unwrap();
        assert_eq!(stored.logs, "line 1\nline 2\n");
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn test_unknown_job() {
        let tracker = JobTracker::new();
        assert!(tracker.get(Uuid::new_v4()).is_none());
        assert!(!tracker.finish(Uuid::new_v4(), JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_finish() {
        let tracker = Arc::new(JobTracker::new());
        let job = tracker.create("web");

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker
                    .wait_for_terminal(job.job_id, Duration::from_secs(60))
                    .await
            })
        };

        tokio::task::yield_now().await;
        tracker.finish(job.job_id, JobStatus::Failed);

        let status = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_wait_on_finished_job_returns_immediately() {
        let tracker = JobTracker::new();
        let job = tracker.create("web");
        tracker.finish(job.job_id, JobStatus::Completed);
        assert_eq!(
            tracker
                .wait_for_terminal(job.job_id, Duration::from_millis(10))
                .await,
            Some(JobStatus::Completed)
        );
        assert_eq!(
            tracker
                .wait_for_terminal(Uuid::new_v4(), Duration::from_millis(10))
                .await,
            None
        );
    }
}
