//! # Cluster Status Refresh
//!
//! Reconciles component state with what the cluster reports, and rotates the
//! bearer token injected into running workloads. Both operations read the
//! cluster through the [`ClusterProbe`] seam; [`CommandClusterProbe`] is the
//! CLI-backed implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::orchestrator::Orchestrator;
use super::single_flight::ClaimKind;
use super::variable_resolver;
use crate::catalog::ComponentDefinition;
use crate::config::ClusterSettings;
use crate::constants::placeholders;
use crate::constants::system::{FAILED_POD_PHASES, PODS_FAILING_ADVISORY, RUNNING_POD_PHASE};
use crate::error::Result;
use crate::events::DeployEvent;
use crate::state_machine::ComponentStatus;

/// Raw facts about one component's namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterObservation {
    pub namespace_exists: bool,
    /// Deployments, deployment configs, or build configs present
    pub has_workloads: bool,
    pub pod_phases: Vec<String>,
    pub route_host: Option<String>,
}

/// Component fields derived from an observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedState {
    pub status: ComponentStatus,
    pub route: Option<String>,
    pub namespace: Option<String>,
    pub error: Option<String>,
}

/// Map an observation onto component fields.
///
/// Any running pod means deployed. Pods that all sit in a failure phase mean
/// failed. Workloads with no pods, or with pods still pending or building,
/// mean deploying.
pub fn classify(namespace: &str, observation: &ClusterObservation) -> ObservedState {
    if !observation.namespace_exists {
        return ObservedState {
            status: ComponentStatus::NotDeployed,
            route: None,
            namespace: None,
            error: None,
        };
    }
    if !observation.has_workloads {
        return ObservedState {
            status: ComponentStatus::NotDeployed,
            route: None,
            namespace: Some(namespace.to_string()),
            error: None,
        };
    }

    let phases = &observation.pod_phases;
    let any_running = phases.iter().any(|p| p == RUNNING_POD_PHASE);
    let all_failed =
        !phases.is_empty() && phases.iter().all(|p| FAILED_POD_PHASES.contains(&p.as_str()));

    let status = if any_running {
        ComponentStatus::Deployed
    } else if all_failed {
        ComponentStatus::Failed
    } else {
        ComponentStatus::Deploying
    };

    ObservedState {
        status,
        route: observation
            .route_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| format!("https://{host}")),
        namespace: Some(namespace.to_string()),
        error: all_failed.then(|| PODS_FAILING_ADVISORY.to_string()),
    }
}

/// Read-mostly access to the cluster
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    async fn login(&self, api_url: &str, token: &str) -> bool;

    async fn observe(&self, namespace: &str, app: &str) -> ClusterObservation;

    /// Resource name of the app's workload, such as `deployment.apps/web`
    async fn find_workload(&self, namespace: &str, app: &str) -> Option<String>;

    async fn set_workload_env(&self, namespace: &str, resource: &str, vars: &[(String, String)]) -> bool;
}

/// [`ClusterProbe`] that shells out to the cluster CLI
#[derive(Debug, Clone)]
pub struct CommandClusterProbe {
    settings: ClusterSettings,
}

impl CommandClusterProbe {
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    /// Stdout of a successful invocation. Arguments are never logged; some
    /// carry credentials.
    async fn run(&self, args: &[String]) -> Option<String> {
        let mut command = Command::new(&self.settings.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(kubeconfig) = &self.settings.kubeconfig {
            command.env("KUBECONFIG", kubeconfig);
        }

        match command.output().await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                debug!(
                    subcommand = args.first().map(String::as_str).unwrap_or_default(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Cluster command failed"
                );
                None
            }
            Err(e) => {
                warn!(program = %self.settings.program, error = %e, "Cluster CLI did not start");
                None
            }
        }
    }

    async fn run_args(&self, args: &[&str]) -> Option<String> {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.run(&owned).await
    }
}

#[async_trait]
impl ClusterProbe for CommandClusterProbe {
    async fn login(&self, api_url: &str, token: &str) -> bool {
        let mut args = vec![
            "login".to_string(),
            api_url.to_string(),
            format!("--token={token}"),
        ];
        if self.settings.insecure_skip_tls_verify {
            args.push("--insecure-skip-tls-verify=true".to_string());
        }
        self.run(&args).await.is_some()
    }

    async fn observe(&self, namespace: &str, app: &str) -> ClusterObservation {
        let namespace_exists = self
            .run_args(&["get", "project", namespace, "-o", "name"])
            .await
            .is_some();
        if !namespace_exists {
            return ClusterObservation::default();
        }

        let has_workloads = self
            .run_args(&["get", "deploy,dc,buildconfig", "-n", namespace, "-o", "name"])
            .await
            .is_some_and(|out| !out.trim().is_empty());
        if !has_workloads {
            return ClusterObservation {
                namespace_exists,
                ..Default::default()
            };
        }

        let pod_phases = self
            .run_args(&[
                "get",
                "pods",
                "-n",
                namespace,
                "-o",
                "jsonpath={.items[*].status.phase}",
            ])
            .await
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let route_host = self
            .run_args(&["get", "route", app, "-n", namespace, "-o", "jsonpath={.spec.host}"])
            .await
            .map(|out| out.trim().to_string())
            .filter(|host| !host.is_empty());

        ClusterObservation {
            namespace_exists,
            has_workloads,
            pod_phases,
            route_host,
        }
    }

    async fn find_workload(&self, namespace: &str, app: &str) -> Option<String> {
        self.run_args(&["get", "deploy,dc", app, "-n", namespace, "-o", "name"])
            .await?
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    async fn set_workload_env(&self, namespace: &str, resource: &str, vars: &[(String, String)]) -> bool {
        let mut args = vec!["set".to_string(), "env".to_string(), resource.to_string()];
        args.extend(vars.iter().map(|(key, value)| format!("{key}={value}")));
        args.extend(["-n".to_string(), namespace.to_string()]);
        self.run(&args).await.is_some()
    }
}

/// Components touched and left alone by one refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    /// Components with a pipeline or cleanup in flight
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenRotation {
    Updated,
    Failed,
    /// No workload found for the component
    NotDeployed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRotationEntry {
    pub component_id: String,
    pub namespace: String,
    pub outcome: TokenRotation,
}

/// Placeholder reference as it appears in a template
fn reference(name: &str) -> String {
    format!("{{{{{name}}}}}")
}

fn consumes_workload_token(component: &ComponentDefinition) -> bool {
    let token = reference(placeholders::SA_TOKEN);
    component.env.iter().any(|t| t.value.contains(&token))
}

impl Orchestrator {
    /// Re-derive every idle component's state from the cluster
    #[instrument(skip_all)]
    pub async fn refresh_status(&self, probe: &dyn ClusterProbe) -> Result<RefreshReport> {
        self.require_config()?;
        let config = self.store.config();
        if !probe.login(&config.api_url, &config.token).await {
            warn!("Cluster login failed; observations may be incomplete");
        }

        let mut report = RefreshReport::default();
        for component in self.catalog.components() {
            let Ok(_claim) = self.in_flight.try_claim(&component.id, ClaimKind::Refresh) else {
                debug!(component_id = %component.id, "Skipping busy component");
                report.skipped.push(component.id.clone());
                continue;
            };

            let namespace = component.namespace();
            let observation = probe.observe(namespace, &component.id).await;
            let observed = classify(namespace, &observation);
            debug!(component_id = %component.id, status = %observed.status, "Observed component");

            self.store.update_component(&component.id, |state| {
                state.status = observed.status;
                state.route = observed.route;
                state.namespace = observed.namespace;
                state.error = observed.error;
            });
            report.refreshed.push(component.id.clone());
        }

        info!(
            refreshed = report.refreshed.len(),
            skipped = report.skipped.len(),
            "Status refresh complete"
        );
        self.broadcaster.publish(&DeployEvent::RefreshComplete);
        Ok(report)
    }

    /// Push the current workload token into every deployed component whose
    /// environment references it
    #[instrument(skip_all)]
    pub async fn refresh_tokens(&self, probe: &dyn ClusterProbe) -> Result<Vec<TokenRotationEntry>> {
        self.require_config()?;
        let config = self.store.config();
        if !probe.login(&config.api_url, &config.token).await {
            warn!("Cluster login failed; token rotation may be incomplete");
        }

        let token_ref = reference(placeholders::SA_TOKEN);
        let api_ref = reference(placeholders::API_URL);
        let mut entries = Vec::new();

        for component in self.catalog.components().iter().filter(|c| consumes_workload_token(c)) {
            let namespace = component.namespace();
            let outcome = match probe.find_workload(namespace, &component.id).await {
                None => TokenRotation::NotDeployed,
                Some(resource) => {
                    let vars: Vec<(String, String)> = component
                        .env
                        .iter()
                        .filter(|t| t.value.contains(&token_ref) || t.value.contains(&api_ref))
                        .map(|t| (t.key.clone(), variable_resolver::resolve(&t.value, &config)))
                        .collect();
                    if probe.set_workload_env(namespace, &resource, &vars).await {
                        TokenRotation::Updated
                    } else {
                        TokenRotation::Failed
                    }
                }
            };
            info!(component_id = %component.id, outcome = ?outcome, "Workload token rotation");
            entries.push(TokenRotationEntry {
                component_id: component.id.clone(),
                namespace: namespace.to_string(),
                outcome,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(phases: &[&str]) -> ClusterObservation {
        ClusterObservation {
            namespace_exists: true,
            has_workloads: true,
            pod_phases: phases.iter().map(|p| p.to_string()).collect(),
            route_host: Some("web.apps.example.com\n".to_string()),
        }
    }

    #[test]
    fn test_missing_namespace_is_not_deployed() {
        let observed = classify("web", &ClusterObservation::default());
        assert_eq!(observed.status, ComponentStatus::NotDeployed);
        assert_eq!(observed.namespace, None);
    }

    #[test]
    fn test_namespace_without_workloads_keeps_namespace() {
        let observed = classify(
            "web",
            &ClusterObservation {
                namespace_exists: true,
                ..Default::default()
            },
        );
        assert_eq!(observed.status, ComponentStatus::NotDeployed);
        assert_eq!(observed.namespace.as_deref(), Some("web"));
    }

    #[test]
    fn test_any_running_pod_is_deployed() {
        let observed = classify("web", &observation(&["Error", "Running"]));
        assert_eq!(observed.status, ComponentStatus::Deployed);
        assert_eq!(observed.route.as_deref(), Some("https://web.apps.example.com"));
        assert!(observed.error.is_none());
    }

    #[test]
    fn test_all_failing_pods_is_failed() {
        let observed = classify("web", &observation(&["CrashLoopBackOff", "Error"]));
        assert_eq!(observed.status, ComponentStatus::Failed);
        assert_eq!(observed.error.as_deref(), Some(PODS_FAILING_ADVISORY));
    }

    #[test]
    fn test_pending_or_no_pods_is_deploying() {
        assert_eq!(
            classify("web", &observation(&["Pending"])).status,
            ComponentStatus::Deploying
        );
        assert_eq!(
            classify("web", &observation(&[])).status,
            ComponentStatus::Deploying
        );
    }

    #[test]
    fn test_reference_format() {
        assert_eq!(reference("sa_token"), "{{sa_token}}");
    }
}
