//! Error types for the deployer core.
//!
//! Precondition failures surface synchronously from the start/cleanup
//! operations. Step failures and pipeline faults never come back through
//! these types once a job exists; they are recorded on the component state
//! and the job record instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployerError {
    #[error("Unknown component: {0}")]
    UnknownComponent(String),
    #[error("Unknown offer: {0}")]
    UnknownOffer(String),
    #[error("Missing configuration: {}", .0.join(", "))]
    MissingConfiguration(Vec<&'static str>),
    #[error("Another deploy or cleanup is in progress for component {0}")]
    DeployInProgress(String),
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
    #[error("Persistence error: {0}")]
    PersistenceError(String),
    #[error("Step execution error: {0}")]
    StepExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl DeployerError {
    /// True for errors raised before any job or cleanup work was started
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::UnknownComponent(_)
                | Self::UnknownOffer(_)
                | Self::MissingConfiguration(_)
                | Self::DeployInProgress(_)
        )
    }
}

impl From<serde_json::Error> for DeployerError {
    fn from(error: serde_json::Error) -> Self {
        DeployerError::PersistenceError(format!("JSON serialization error: {error}"))
    }
}

impl From<std::io::Error> for DeployerError {
    fn from(error: std::io::Error) -> Self {
        DeployerError::PersistenceError(error.to_string())
    }
}

impl From<config::ConfigError> for DeployerError {
    fn from(error: config::ConfigError) -> Self {
        DeployerError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeployerError>;
