//! # Engine Settings
//!
//! Process-level settings for the orchestrator: where state is persisted,
//! where the catalog lives, how the step runner and cluster CLI are invoked,
//! and the batch wait tick. These are distinct from [`crate::models::GlobalConfig`],
//! which holds the cluster connection the user edits at runtime.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deployer_core::config::SettingsLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // defaults, then config/deployer.toml, then config/deployer.<env>.toml,
//! // then DEPLOYER__* environment variables
//! let settings = SettingsLoader::new().load()?;
//! println!("snapshot at {}", settings.snapshot_path().display());
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::system::DEFAULT_JOB_POLL_INTERVAL_MS;
use crate::error::{DeployerError, Result};

pub use loader::SettingsLoader;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding the durable snapshot
    pub data_dir: PathBuf,
    pub snapshot_file: String,
    /// JSON catalog of components and offers
    pub catalog_path: PathBuf,
    /// Tick at which a batch re-checks the job it waits on
    pub job_poll_interval_ms: u64,
    /// Initial value of the runtime default namespace
    pub default_namespace: String,
    /// Initial value of the runtime repository URL
    pub default_repo_url: String,
    pub runner: RunnerSettings,
    pub cluster: ClusterSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            snapshot_file: "state.json".to_string(),
            catalog_path: PathBuf::from("config/catalog.json"),
            job_poll_interval_ms: DEFAULT_JOB_POLL_INTERVAL_MS,
            default_namespace: "deployer-demo".to_string(),
            default_repo_url: String::new(),
            runner: RunnerSettings::default(),
            cluster: ClusterSettings::default(),
        }
    }
}

/// How the playbook runner process is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub program: String,
    /// Directory containing the playbooks named by step actions
    pub playbook_dir: PathBuf,
    /// Inventory path, relative to `playbook_dir` unless absolute
    pub inventory: PathBuf,
    pub verbose: bool,
    /// Extra environment for the runner process
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            playbook_dir: PathBuf::from("ansible"),
            inventory: PathBuf::from("inventory"),
            verbose: true,
            env: BTreeMap::new(),
        }
    }
}

/// How the read-only cluster probe talks to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub program: String,
    pub kubeconfig: Option<PathBuf>,
    pub insecure_skip_tls_verify: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            program: "oc".to_string(),
            kubeconfig: Some(PathBuf::from("/tmp/deployer-kubeconfig")),
            insecure_skip_tls_verify: true,
        }
    }
}

impl EngineSettings {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_poll_interval_ms == 0 {
            return Err(DeployerError::ConfigurationError(
                "job_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.snapshot_file.trim().is_empty() {
            return Err(DeployerError::ConfigurationError(
                "snapshot_file must not be empty".to_string(),
            ));
        }
        if self.runner.program.trim().is_empty() {
            return Err(DeployerError::ConfigurationError(
                "runner.program must not be empty".to_string(),
            ));
        }
        if self.cluster.program.trim().is_empty() {
            return Err(DeployerError::ConfigurationError(
                "cluster.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.snapshot_path(), PathBuf::from("data/state.json"));
        assert_eq!(settings.job_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let settings = EngineSettings {
            job_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(DeployerError::ConfigurationError(_))
        ));
    }
}
