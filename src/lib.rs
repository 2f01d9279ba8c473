#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Deployer Core
//!
//! Deployment orchestration engine for catalog-described components running
//! on a Kubernetes/OpenShift cluster.
//!
//! ## Overview
//!
//! A static catalog declares components, each with an ordered pipeline of
//! steps executed by an external provisioning tool. The core runs those
//! pipelines in the background, tracks every run as a job, keeps one
//! lifecycle state per component, persists the durable part of that state,
//! and broadcasts every transition to any number of observers.
//!
//! ## Module Organization
//!
//! - [`catalog`] - Component and offer definitions, validation, schedules
//! - [`orchestration`] - Pipelines, batches, cleanup, cluster refresh
//! - [`models`] - Component state, jobs, global config, snapshots
//! - [`state_machine`] - Component and job status enums
//! - [`events`] - Event types and the broadcaster
//! - [`persistence`] - Snapshot stores
//! - [`config`] - Engine settings loading
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deployer_core::catalog::Catalog;
//! use deployer_core::config::SettingsLoader;
//! use deployer_core::orchestration::Orchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! deployer_core::logging::init_structured_logging();
//!
//! let settings = SettingsLoader::new().load()?;
//! let catalog = Catalog::from_path(&settings.catalog_path)?;
//! let orchestrator = Orchestrator::builder(catalog).with_settings(settings).build()?;
//!
//! let (_, mut events) = orchestrator.subscribe_channel("console");
//! orchestrator.spawn_deploy_all()?;
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod state_machine;

pub use catalog::{Catalog, ComponentDefinition, OfferDefinition, StepDefinition};
pub use config::{EngineSettings, SettingsLoader};
pub use error::{DeployerError, Result};
pub use events::{DeployEvent, EventBroadcaster, EventSubscriber};
pub use models::{ComponentState, ConfigUpdate, GlobalConfig, Job, MaskedConfig};
pub use orchestration::{Orchestrator, StepOutcome, StepRunner};
pub use state_machine::{ComponentStatus, JobStatus};
