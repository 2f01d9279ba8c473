//! # Orchestrator
//!
//! The handle transports and the CLI hold. It owns the catalog, the state
//! store, the job tracker, the broadcaster, and the step runner, and exposes
//! every operation the core supports. Cloning is cheap; clones share state.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deployer_core::catalog::Catalog;
//! use deployer_core::models::ConfigUpdate;
//! use deployer_core::orchestration::Orchestrator;
//! use deployer_core::persistence::MemorySnapshotStore;
//!
//! # async fn example() -> deployer_core::error::Result<()> {
//! let catalog = Catalog::from_path("config/catalog.json".as_ref())?;
//! let orchestrator = Orchestrator::builder(catalog)
//!     .with_persistence(Arc::new(MemorySnapshotStore::new()))
//!     .build()?;
//!
//! orchestrator.update_config(ConfigUpdate {
//!     api_url: Some("https://api.cluster:6443".to_string()),
//!     token: Some("sha256~token".to_string()),
//!     ..Default::default()
//! });
//!
//! let ticket = orchestrator.start_deploy("agent-ai")?;
//! let status = orchestrator.wait_for_job(ticket.job_id).await;
//! println!("{status:?}");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};
use uuid::Uuid;

use super::batch_orchestrator::{BatchOrchestrator, BatchReport, JobLauncher};
use super::job_tracker::JobTracker;
use super::pipeline_executor::PipelineExecutor;
use super::process_runner::ProcessStepRunner;
use super::single_flight::{ClaimKind, SingleFlight};
use super::state_store::StateStore;
use super::step_runner::StepRunner;
use crate::catalog::{Catalog, ComponentDefinition};
use crate::config::EngineSettings;
use crate::error::{DeployerError, Result};
use crate::events::{BatchScope, DeployEvent, EventBroadcaster, EventSubscriber, SubscriptionId};
use crate::models::{ComponentState, ConfigUpdate, GlobalConfig, Job, MaskedConfig};
use crate::persistence::{FileSnapshotStore, SnapshotStore};
use crate::state_machine::JobStatus;

/// Immediate answer to a deploy request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTicket {
    pub job_id: Uuid,
    pub component_id: String,
}

/// Everything a freshly connected observer needs before it follows events
#[derive(Debug, Clone, Serialize)]
pub struct FullState {
    pub config: MaskedConfig,
    pub components: BTreeMap<String, ComponentState>,
    pub definitions: Catalog,
}

pub struct OrchestratorBuilder {
    catalog: Catalog,
    settings: EngineSettings,
    runner: Option<Arc<dyn StepRunner>>,
    persistence: Option<Arc<dyn SnapshotStore>>,
    broadcaster: Option<Arc<EventBroadcaster>>,
}

impl OrchestratorBuilder {
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn SnapshotStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<EventBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Restore state from the snapshot store and assemble the orchestrator.
    /// Defaults to the playbook runner and a file snapshot under `data_dir`.
    pub fn build(self) -> Result<Orchestrator> {
        self.settings.validate()?;

        let settings = Arc::new(self.settings);
        let broadcaster = self
            .broadcaster
            .unwrap_or_else(|| Arc::new(EventBroadcaster::new()));
        let runner: Arc<dyn StepRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(ProcessStepRunner::new(settings.runner.clone())),
        };
        let persistence: Arc<dyn SnapshotStore> = match self.persistence {
            Some(persistence) => persistence,
            None => Arc::new(FileSnapshotStore::new(settings.snapshot_path())),
        };

        let store = Arc::new(StateStore::initialize(
            &self.catalog,
            GlobalConfig::new(&settings.default_namespace, &settings.default_repo_url),
            persistence,
            Arc::clone(&broadcaster),
        ));
        let jobs = Arc::new(JobTracker::new());
        let executor = Arc::new(PipelineExecutor::new(
            Arc::clone(&store),
            Arc::clone(&jobs),
            Arc::clone(&broadcaster),
            Arc::clone(&runner),
        ));

        info!(
            components = self.catalog.components().len(),
            offers = self.catalog.offers().len(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            catalog: Arc::new(self.catalog),
            settings,
            store,
            jobs,
            broadcaster,
            runner,
            in_flight: Arc::new(SingleFlight::new()),
            executor,
        })
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    pub(super) catalog: Arc<Catalog>,
    pub(super) settings: Arc<EngineSettings>,
    pub(super) store: Arc<StateStore>,
    pub(super) jobs: Arc<JobTracker>,
    pub(super) broadcaster: Arc<EventBroadcaster>,
    pub(super) runner: Arc<dyn StepRunner>,
    pub(super) in_flight: Arc<SingleFlight>,
    executor: Arc<PipelineExecutor>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("components", &self.catalog.components().len())
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder(catalog: Catalog) -> OrchestratorBuilder {
        OrchestratorBuilder {
            catalog,
            settings: EngineSettings::default(),
            runner: None,
            persistence: None,
            broadcaster: None,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(super) fn require_config(&self) -> Result<()> {
        let missing = self.store.config().missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DeployerError::MissingConfiguration(missing))
        }
    }

    fn runtime() -> Result<Handle> {
        Handle::try_current().map_err(|_| {
            DeployerError::StepExecutionError("no async runtime available for the pipeline".to_string())
        })
    }

    fn require_component(&self, component_id: &str) -> Result<&ComponentDefinition> {
        self.catalog
            .component(component_id)
            .ok_or_else(|| DeployerError::UnknownComponent(component_id.to_string()))
    }

    /// Start one component's pipeline in the background.
    ///
    /// Preconditions are checked before anything changes: the component must
    /// exist, endpoint and credential must be set, and no other pipeline or
    /// cleanup may hold the component. Must be called from within a Tokio
    /// runtime.
    #[instrument(skip(self))]
    pub fn start_deploy(&self, component_id: &str) -> Result<DeployTicket> {
        let component = self.require_component(component_id)?;
        self.require_config()?;
        let runtime = Self::runtime()?;
        let claim = self.in_flight.try_claim(component_id, ClaimKind::Deploy)?;

        let job = self.executor.begin(component);
        let executor = Arc::clone(&self.executor);
        let definition = component.clone();
        runtime.spawn(async move {
            executor.execute(definition, job.job_id, claim).await;
        });

        Ok(DeployTicket {
            job_id: job.job_id,
            component_id: component_id.to_string(),
        })
    }

    /// Wait until a job finishes; `None` for an unknown job
    pub async fn wait_for_job(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs
            .wait_for_terminal(job_id, self.settings.job_poll_interval())
            .await
    }

    fn owned_schedule(schedule: Vec<&ComponentDefinition>) -> Vec<ComponentDefinition> {
        schedule.into_iter().cloned().collect()
    }

    /// Deploy every component in schedule order
    pub async fn deploy_all(&self) -> Result<BatchReport> {
        self.require_config()?;
        let schedule = Self::owned_schedule(self.catalog.schedule_all());
        Ok(self.batch().run(BatchScope::All, schedule).await)
    }

    /// Deploy an offer's components in schedule order
    pub async fn deploy_offer(&self, offer_id: &str) -> Result<BatchReport> {
        let schedule = Self::owned_schedule(self.catalog.schedule_offer(offer_id)?);
        self.require_config()?;
        Ok(self
            .batch()
            .run(BatchScope::Offer(offer_id.to_string()), schedule)
            .await)
    }

    /// Fire-and-forget [`Self::deploy_all`]; preconditions are still checked
    /// before returning
    pub fn spawn_deploy_all(&self) -> Result<JoinHandle<BatchReport>> {
        self.require_config()?;
        let runtime = Self::runtime()?;
        let schedule = Self::owned_schedule(self.catalog.schedule_all());
        let batch = self.batch();
        Ok(runtime.spawn(async move {
            batch.run(BatchScope::All, schedule).await
        }))
    }

    /// Fire-and-forget [`Self::deploy_offer`]
    pub fn spawn_deploy_offer(&self, offer_id: &str) -> Result<JoinHandle<BatchReport>> {
        let schedule = Self::owned_schedule(self.catalog.schedule_offer(offer_id)?);
        self.require_config()?;
        let runtime = Self::runtime()?;
        let batch = self.batch();
        let scope = BatchScope::Offer(offer_id.to_string());
        Ok(runtime.spawn(async move { batch.run(scope, schedule).await }))
    }

    fn batch(&self) -> BatchOrchestrator<Orchestrator> {
        BatchOrchestrator::new(self.clone(), Arc::clone(&self.broadcaster))
    }

    pub fn state(&self) -> FullState {
        FullState {
            config: self.store.masked_config(),
            components: self.store.components(),
            definitions: (*self.catalog).clone(),
        }
    }

    pub fn component(&self, component_id: &str) -> Option<ComponentState> {
        self.store.component(component_id)
    }

    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.get(job_id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.list()
    }

    pub fn is_busy(&self, component_id: &str) -> bool {
        self.in_flight.is_active(component_id)
    }

    pub fn get_config(&self) -> MaskedConfig {
        self.store.masked_config()
    }

    pub fn update_config(&self, update: ConfigUpdate) -> MaskedConfig {
        self.store.update_config(update)
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        self.broadcaster.subscribe(subscriber)
    }

    pub fn subscribe_channel(
        &self,
        name: impl Into<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<DeployEvent>) {
        self.broadcaster.subscribe_channel(name)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }
}

#[async_trait]
impl JobLauncher for Orchestrator {
    fn start_deploy(&self, component_id: &str) -> Result<Uuid> {
        Orchestrator::start_deploy(self, component_id).map(|ticket| ticket.job_id)
    }

    async fn wait_for_job(&self, job_id: Uuid) -> Option<JobStatus> {
        Orchestrator::wait_for_job(self, job_id).await
    }
}
