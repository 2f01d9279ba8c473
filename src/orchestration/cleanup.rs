//! Namespace teardown.
//!
//! Cleanup runs synchronously from the caller's point of view and returns a
//! per-namespace report. Components sharing a namespace are torn down with a
//! single runner invocation.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::orchestrator::Orchestrator;
use super::single_flight::ClaimKind;
use super::step_runner::StepParameters;
use crate::catalog::{Catalog, ComponentDefinition};
use crate::constants::params;
use crate::error::{DeployerError, Result};
use crate::events::DeployEvent;
use crate::models::ComponentState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceCleanup {
    pub namespace: String,
    pub success: bool,
    pub exit_status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub success: bool,
    pub summary: String,
    pub details: Vec<NamespaceCleanup>,
}

fn summarize(details: &[NamespaceCleanup]) -> String {
    let failed: Vec<&str> = details
        .iter()
        .filter(|d| !d.success)
        .map(|d| d.namespace.as_str())
        .collect();
    if failed.is_empty() {
        let removed: Vec<&str> = details.iter().map(|d| d.namespace.as_str()).collect();
        format!(
            "Cleanup complete: {} namespace(s) removed: {}",
            details.len(),
            removed.join(", ")
        )
    } else {
        format!(
            "Partial cleanup: {}/{} namespace(s) removed. Failed: {}",
            details.len() - failed.len(),
            details.len(),
            failed.join(", ")
        )
    }
}

impl Orchestrator {
    pub async fn cleanup_component(&self, component_id: &str) -> Result<CleanupReport> {
        let component = self
            .catalog
            .component(component_id)
            .ok_or_else(|| DeployerError::UnknownComponent(component_id.to_string()))?
            .clone();
        self.cleanup(vec![component]).await
    }

    pub async fn cleanup_all(&self) -> Result<CleanupReport> {
        let targets = self.catalog.components().to_vec();
        self.cleanup(targets).await
    }

    pub async fn cleanup_offer(&self, offer_id: &str) -> Result<CleanupReport> {
        let targets: Vec<ComponentDefinition> = self
            .catalog
            .schedule_offer(offer_id)?
            .into_iter()
            .cloned()
            .collect();
        self.cleanup(targets).await
    }

    #[instrument(skip_all, fields(components = targets.len()))]
    async fn cleanup(&self, targets: Vec<ComponentDefinition>) -> Result<CleanupReport> {
        self.require_config()?;
        let _claims = self
            .in_flight
            .try_claim_all(targets.iter().map(|c| c.id.as_str()), ClaimKind::Cleanup)?;

        let config = self.store.config();
        let namespaces = Catalog::namespaces_of(&targets);
        let emit = |chunk: &str| {
            self.broadcaster.publish(&DeployEvent::CleanupOutput {
                data: chunk.to_string(),
            })
        };

        emit(&format!(
            "\nStarting cleanup of {} namespace(s)...\n",
            namespaces.len()
        ));

        let mut details = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            emit(&format!("\n═══ Removing namespace: {namespace} ═══\n"));

            let mut parameters = StepParameters::new();
            parameters.insert(params::API_URL.to_string(), config.api_url.clone().into());
            parameters.insert(params::TOKEN.to_string(), config.token.clone().into());
            parameters.insert(params::NAMESPACE.to_string(), namespace.clone().into());

            let outcome = self
                .runner
                .run(self.catalog.cleanup_action(), &parameters, &emit)
                .await;

            if outcome.success {
                emit(&format!("✓ Namespace \"{namespace}\" removed\n"));
                info!(namespace = %namespace, "Namespace removed");
            } else {
                emit(&format!(
                    "⚠ Failed to remove namespace \"{namespace}\" (exit status {})\n",
                    outcome.exit_status
                ));
                warn!(namespace = %namespace, exit_status = outcome.exit_status, "Namespace cleanup failed");
            }
            details.push(NamespaceCleanup {
                namespace,
                success: outcome.success,
                exit_status: outcome.exit_status,
            });
        }

        let ids: Vec<String> = targets.iter().map(|c| c.id.clone()).collect();
        self.store.update_components(&ids, ComponentState::reset);
        if targets.iter().any(ComponentDefinition::has_access_bootstrap) {
            // the service account went away with its namespace
            self.store.set_derived_token(None);
        }

        let summary = summarize(&details);
        let success = details.iter().all(|d| d.success);
        emit(&format!("\n{summary}\n"));
        self.broadcaster.publish(&DeployEvent::CleanupComplete {
            success,
            summary: summary.clone(),
        });

        Ok(CleanupReport {
            success,
            summary,
            details,
        })
    }
}
