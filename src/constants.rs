//! # System Constants
//!
//! Fixed strings and limits shared by the pipeline, the state store and the
//! transport collaborators that consume events.

// Re-export state types for convenience
pub use crate::state_machine::{ComponentStatus, JobStatus};

/// Event type tags as they appear on the wire (`type` field)
pub mod events {
    pub const COMPONENT_UPDATE: &str = "component-update";
    pub const CONFIG_UPDATE: &str = "config-update";
    pub const JOB_START: &str = "job-start";
    pub const JOB_OUTPUT: &str = "job-output";
    pub const JOB_COMPLETE: &str = "job-complete";
    pub const JOB_ERROR: &str = "job-error";
    pub const BATCH_STOPPED: &str = "batch-stopped";
    pub const BATCH_COMPLETE: &str = "batch-complete";
    pub const CLEANUP_OUTPUT: &str = "cleanup-output";
    pub const CLEANUP_COMPLETE: &str = "cleanup-complete";
    pub const REFRESH_COMPLETE: &str = "refresh-complete";
}

/// Parameter names handed to the step runner
pub mod params {
    pub const API_URL: &str = "ocp_api_url";
    pub const TOKEN: &str = "ocp_token";
    pub const NAMESPACE: &str = "namespace";
    pub const APP_NAME: &str = "app_name";
    pub const REPO_URL: &str = "git_repo_url";
    pub const CONTEXT_DIR: &str = "context_dir";
    pub const ENV_VARS: &str = "env_vars";
    pub const SERVICE_PORT: &str = "service_port";
}

/// Template placeholders understood by the variable resolver
pub mod placeholders {
    pub const API_URL: &str = "ocp_api_url";
    pub const SA_TOKEN: &str = "sa_token";
    pub const NAMESPACE: &str = "namespace";
    pub const REPO_URL: &str = "git_repo_url";
}

pub mod system {
    /// Returned in place of any non-empty secret
    pub const MASKED_SECRET: &str = "***";

    /// Error text recorded on a component whose primary step failed
    pub const PIPELINE_FAILED_ADVISORY: &str = "Pipeline failed. See the logs.";

    /// Error text recorded when the cluster reports only failing pods
    pub const PODS_FAILING_ADVISORY: &str = "Pods are failing. Check the logs.";

    /// Ports the deploy action exposes without an explicit `service_port`
    pub const DEFAULT_SERVICE_PORTS: &[u16] = &[8080, 3000];

    pub const DEFAULT_CLEANUP_ACTION: &str = "cleanup.yml";

    pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 1000;

    /// Pod phases that count as a failed rollout when every pod reports one
    pub const FAILED_POD_PHASES: &[&str] = &["CrashLoopBackOff", "Error", "Failed"];

    pub const RUNNING_POD_PHASE: &str = "Running";
}
