//! # Pipeline Executor
//!
//! Runs the ordered steps of one component inside a background task.
//!
//! ## Failure policy
//!
//! - An auxiliary step that fails is logged as a warning and the pipeline
//!   moves on.
//! - A failing primary step fails the pipeline; no later step runs.
//! - Any internal error or panic takes the abort path: component `failed`
//!   with the error text, job `failed`, and a `job-error` event. A component
//!   is never left in `deploying` once its task ends.
//!
//! The configuration is re-read before each step, so a token harvested from
//! an access-bootstrap step is visible to the steps that follow it.

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::output_scraper;
use super::single_flight::Claim;
use super::state_store::StateStore;
use super::step_runner::{StepParameters, StepRunner};
use super::variable_resolver;
use crate::catalog::{ComponentDefinition, StepDefinition};
use crate::constants::params;
use crate::constants::system::{DEFAULT_SERVICE_PORTS, PIPELINE_FAILED_ADVISORY};
use crate::error::{DeployerError, Result};
use crate::events::{DeployEvent, EventBroadcaster};
use crate::logging::{log_job_operation, log_step_operation};
use crate::models::{GlobalConfig, Job};
use crate::state_machine::JobStatus;

use super::job_tracker::JobTracker;

/// What a completed step loop produced
#[derive(Debug, Clone, PartialEq, Eq)]
struct PipelineResult {
    success: bool,
    route: Option<String>,
}

/// Parameters for one step, in override order: the step's fixed defaults,
/// the connection parameters, the step's explicit extras, and for the primary
/// step the build context.
pub fn build_step_parameters(
    component: &ComponentDefinition,
    step: &StepDefinition,
    config: &GlobalConfig,
) -> Result<StepParameters> {
    let mut parameters = StepParameters::new();
    for (key, value) in &step.defaults {
        parameters.insert(key.clone(), value.clone());
    }

    parameters.insert(params::API_URL.to_string(), config.api_url.clone().into());
    parameters.insert(params::TOKEN.to_string(), config.token.clone().into());
    parameters.insert(
        params::NAMESPACE.to_string(),
        component.namespace().to_string().into(),
    );

    for (key, value) in &step.extra_params {
        parameters.insert(key.clone(), value.clone());
    }

    if step.primary {
        parameters.insert(params::APP_NAME.to_string(), component.id.clone().into());
        parameters.insert(params::REPO_URL.to_string(), config.repo_url.clone().into());
        parameters.insert(
            params::CONTEXT_DIR.to_string(),
            component.context_dir_for(step).into(),
        );

        if !component.env.is_empty() {
            let resolved = variable_resolver::resolve_env(&component.env, config);
            let env_vars = serde_json::to_value(resolved).map_err(|e| {
                DeployerError::StepExecutionError(format!("cannot encode env_vars: {e}"))
            })?;
            parameters.insert(params::ENV_VARS.to_string(), env_vars);
        }

        if let Some(port) = component.port {
            if !DEFAULT_SERVICE_PORTS.contains(&port) {
                parameters.insert(params::SERVICE_PORT.to_string(), Value::from(port));
            }
        }
    }

    Ok(parameters)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "pipeline panicked".to_string()
    }
}

pub struct PipelineExecutor {
    store: Arc<StateStore>,
    jobs: Arc<JobTracker>,
    broadcaster: Arc<EventBroadcaster>,
    runner: Arc<dyn StepRunner>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor").finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<StateStore>,
        jobs: Arc<JobTracker>,
        broadcaster: Arc<EventBroadcaster>,
        runner: Arc<dyn StepRunner>,
    ) -> Self {
        Self {
            store,
            jobs,
            broadcaster,
            runner,
        }
    }

    /// Allocate the job, reset the component, and announce the run
    pub fn begin(&self, component: &ComponentDefinition) -> Job {
        let job = self.jobs.create(&component.id);
        self.store
            .update_component(&component.id, |state| state.begin_run(Utc::now()));
        self.broadcaster.publish(&DeployEvent::JobStart {
            job_id: job.job_id,
            component_id: component.id.clone(),
        });
        log_job_operation("start", Some(job.job_id), &component.id, "running", None);
        job
    }

    /// Drive the pipeline to a terminal state. The claim is released once
    /// the component state is final and before the job is marked terminal,
    /// so anything woken by the job can claim the component again.
    #[instrument(skip_all, fields(component_id = %component.id, job_id = %job_id))]
    pub async fn execute(&self, component: ComponentDefinition, job_id: Uuid, claim: Claim) {
        let run = AssertUnwindSafe(self.run_steps(&component, job_id))
            .catch_unwind()
            .await;

        match run {
            Ok(Ok(result)) => self.complete(&component, job_id, claim, result),
            Ok(Err(e)) => self.abort(&component, job_id, claim, e.to_string()),
            Err(payload) => self.abort(&component, job_id, claim, panic_message(payload)),
        }
    }

    /// Append one chunk to both logs and republish it
    fn emit(&self, job_id: Uuid, component_id: &str, chunk: &str) {
        self.jobs.append_log(job_id, chunk);
        self.store.append_component_log(component_id, chunk);
        self.broadcaster.publish(&DeployEvent::JobOutput {
            job_id,
            component_id: component_id.to_string(),
            data: chunk.to_string(),
        });
    }

    async fn run_steps(&self, component: &ComponentDefinition, job_id: Uuid) -> Result<PipelineResult> {
        let mut result = PipelineResult {
            success: true,
            route: None,
        };

        for step in &component.steps {
            let config = self.store.config();
            let parameters = build_step_parameters(component, step, &config)?;

            self.emit(job_id, &component.id, &format!("\n═══ Step: {} ═══\n", step.name));
            log_step_operation("run", job_id, &component.id, &step.name, "running", None);

            let sink = |chunk: &str| self.emit(job_id, &component.id, chunk);
            let outcome = self.runner.run(&step.action, &parameters, &sink).await;

            let scraped = output_scraper::scrape(&outcome.output);
            if step.harvests_token() {
                if let Some(token) = scraped.token {
                    info!(step = %step.id, "Captured service account token");
                    self.store.set_derived_token(Some(token));
                }
            }
            if let Some(route) = scraped.route {
                result.route = Some(route);
            }

            if outcome.success {
                self.emit(job_id, &component.id, &format!("✓ Step \"{}\" completed\n", step.name));
                log_step_operation("run", job_id, &component.id, &step.name, "completed", None);
            } else if step.primary {
                self.emit(
                    job_id,
                    &component.id,
                    &format!("\n✗ Step \"{}\" failed (exit status {})\n", step.name, outcome.exit_status),
                );
                log_step_operation("run", job_id, &component.id, &step.name, "failed", None);
                result.success = false;
                break;
            } else {
                self.emit(
                    job_id,
                    &component.id,
                    &format!(
                        "\n⚠ Step \"{}\" failed (exit status {}), non-critical, continuing\n",
                        step.name, outcome.exit_status
                    ),
                );
                warn!(
                    step = %step.id,
                    exit_status = outcome.exit_status,
                    "Auxiliary step failed; continuing"
                );
            }
        }

        Ok(result)
    }

    fn complete(&self, component: &ComponentDefinition, job_id: Uuid, claim: Claim, result: PipelineResult) {
        let error = (!result.success).then(|| PIPELINE_FAILED_ADVISORY.to_string());
        let namespace = component.namespace();
        self.store.update_component(&component.id, |state| {
            state.finish_run(result.success, result.route.clone(), namespace, error, Utc::now())
        });
        drop(claim);

        let status = JobStatus::from_success(result.success);
        self.jobs.finish(job_id, status);
        self.broadcaster.publish(&DeployEvent::JobComplete {
            job_id,
            component_id: component.id.clone(),
            success: result.success,
        });
        log_job_operation("complete", Some(job_id), &component.id, &status.to_string(), None);
    }

    fn abort(&self, component: &ComponentDefinition, job_id: Uuid, claim: Claim, message: String) {
        warn!(error = %message, "Pipeline aborted");
        self.store
            .update_component(&component.id, |state| state.fail_with(message.clone(), Utc::now()));
        drop(claim);

        self.jobs.finish(job_id, JobStatus::Failed);
        self.broadcaster.publish(&DeployEvent::JobError {
            job_id,
            component_id: component.id.clone(),
            error: message.clone(),
        });
        log_job_operation("error", Some(job_id), &component.id, "failed", Some(&message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn catalog() -> Catalog {
        Catalog::from_json_str(
            r#"{"components": [
                {"id": "agent", "name": "Agent", "namespace": "agent-ns", "port": 8000,
                 "env": [{"key": "K8S_BEARER_TOKEN", "value": "{{sa_token}}"}],
                 "steps": [
                    {"id": "redis", "name": "Redis", "action": "deploy-redis.yml",
                     "defaults": {"namespace": "ignored", "redis_version": "7"}},
                    {"id": "rbac", "name": "RBAC", "action": "setup-rbac.yml",
                     "purpose": "access-bootstrap", "extra_params": {"sa_name": "mcp-sa"}},
                    {"id": "app", "name": "App", "action": "deploy-component.yml", "context_dir": "agent-src"}
                 ]},
                {"id": "web", "name": "Web", "port": 8080, "action": "deploy-component.yml"}
            ]}"#,
        )
        .unwrap()
    }

    fn config() -> GlobalConfig {
        let mut config = GlobalConfig::new("demo", "https://git/repo.git");
        config.api_url = "https://api:6443".to_string();
        config.token = "user-token".to_string();
        config
    }

    #[test]
    fn test_auxiliary_step_parameters() {
        let catalog = catalog();
        let agent = catalog.component("agent").unwrap();

        let redis = build_step_parameters(agent, &agent.steps[0], &config()).unwrap();
        assert_eq!(redis["namespace"], "agent-ns");
        assert_eq!(redis["redis_version"], "7");
        assert_eq!(redis["ocp_token"], "user-token");
        assert!(!redis.contains_key("app_name"));

        let rbac = build_step_parameters(agent, &agent.steps[1], &config()).unwrap();
        assert_eq!(rbac["sa_name"], "mcp-sa");
    }

    #[test]
    fn test_primary_step_parameters() {
        let catalog = catalog();
        let agent = catalog.component("agent").unwrap();
        let mut config = config();
        config.sa_token = Some("sa-xyz".to_string());

        let app = build_step_parameters(agent, &agent.steps[2], &config).unwrap();
        assert_eq!(app["app_name"], "agent");
        assert_eq!(app["git_repo_url"], "https://git/repo.git");
        assert_eq!(app["context_dir"], "agent-src");
        assert_eq!(app["service_port"], 8000);
        assert_eq!(app["env_vars"][0]["key"], "K8S_BEARER_TOKEN");
        assert_eq!(app["env_vars"][0]["value"], "sa-xyz");
    }

    #[test]
    fn test_default_port_is_not_sent() {
        let catalog = catalog();
        let web = catalog.component("web").unwrap();
        let params = build_step_parameters(web, &web.steps[0], &config()).unwrap();
        assert!(!params.contains_key("service_port"));
        assert!(!params.contains_key("env_vars"));
        assert_eq!(params["context_dir"], "web");
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(42_u8)), "pipeline panicked");
    }
}
