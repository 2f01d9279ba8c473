//! # Orchestration Engine
//!
//! Runs component pipelines, sequences batches, tears namespaces down, and
//! reconciles state with the cluster.
//!
//! ## Core Components
//!
//! - **Orchestrator**: the shared handle; entry point for every operation
//! - **PipelineExecutor**: runs one component's steps in a background task
//! - **BatchOrchestrator**: deploys a schedule one component at a time
//! - **StateStore**: component states and global config, persisted on change
//! - **JobTracker**: in-memory job records with completion notification
//! - **StepRunner**: seam to the external provisioning tool
//! - **variable_resolver** / **output_scraper**: the two text boundaries
//!   around the runner, templating on the way in and scraping on the way out

pub mod batch_orchestrator;
pub mod cleanup;
pub mod job_tracker;
pub mod orchestrator;
pub mod output_scraper;
pub mod pipeline_executor;
pub mod process_runner;
pub mod single_flight;
pub mod state_store;
pub mod status_refresh;
pub mod step_runner;
pub mod variable_resolver;

pub use batch_orchestrator::{BatchEntry, BatchOrchestrator, BatchReport, JobLauncher};
pub use cleanup::{CleanupReport, NamespaceCleanup};
pub use job_tracker::JobTracker;
pub use orchestrator::{DeployTicket, FullState, Orchestrator, OrchestratorBuilder};
pub use output_scraper::ScrapedValues;
pub use pipeline_executor::{build_step_parameters, PipelineExecutor};
pub use process_runner::ProcessStepRunner;
pub use single_flight::{Claim, ClaimKind, SingleFlight};
pub use state_store::StateStore;
pub use status_refresh::{
    classify, ClusterObservation, ClusterProbe, CommandClusterProbe, ObservedState, RefreshReport,
    TokenRotation, TokenRotationEntry,
};
pub use step_runner::{OutputSink, StepOutcome, StepParameters, StepRunner};
pub use variable_resolver::ResolvedEnvVar;
