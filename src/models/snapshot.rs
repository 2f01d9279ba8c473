//! Durable snapshot shape.
//!
//! Every field is optional on the way in so that a snapshot written by an
//! older catalog or an older build merges field by field into freshly
//! initialized state instead of replacing it. Logs and jobs are never part
//! of a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::{ComponentState, GlobalConfig};
use crate::state_machine::ComponentStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    #[serde(default)]
    pub config: PersistedConfig,
    #[serde(default)]
    pub components: BTreeMap<String, PersistedComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PersistedConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub sa_token: Option<String>,
    #[serde(default)]
    pub secrets: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PersistedComponent {
    #[serde(default)]
    pub status: Option<ComponentStatus>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Snapshot {
    /// Capture the durable part of the live state
    pub fn capture<'a>(
        config: &GlobalConfig,
        components: impl IntoIterator<Item = (&'a String, &'a ComponentState)>,
    ) -> Self {
        Self {
            config: PersistedConfig {
                api_url: Some(config.api_url.clone()),
                token: Some(config.token.clone()),
                namespace: Some(config.namespace.clone()),
                repo_url: Some(config.repo_url.clone()),
                sa_token: config.sa_token.clone(),
                secrets: Some(config.secrets.clone()),
            },
            components: components
                .into_iter()
                .map(|(id, state)| {
                    (
                        id.clone(),
                        PersistedComponent {
                            status: Some(state.status),
                            route: state.route.clone(),
                            started_at: state.started_at,
                            finished_at: state.finished_at,
                            error: state.error.clone(),
                            namespace: state.namespace.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Overlay the snapshot onto default state.
    ///
    /// Components unknown to `components` (removed from the catalog since the
    /// snapshot was written) are skipped; components missing from the
    /// snapshot keep their defaults.
    pub fn merge_into(
        self,
        config: &mut GlobalConfig,
        components: &mut BTreeMap<String, ComponentState>,
    ) {
        let saved = self.config;
        if let Some(api_url) = saved.api_url {
            config.api_url = api_url;
        }
        if let Some(token) = saved.token {
            config.token = token;
        }
        if let Some(namespace) = saved.namespace {
            config.namespace = namespace;
        }
        if let Some(repo_url) = saved.repo_url {
            config.repo_url = repo_url;
        }
        if saved.sa_token.is_some() {
            config.sa_token = saved.sa_token;
        }
        if let Some(secrets) = saved.secrets {
            config.secrets.extend(secrets);
        }

        for (id, persisted) in self.components {
            let Some(state) = components.get_mut(&id) else {
                debug!(component_id = %id, "Skipping snapshot entry for component no longer in catalog");
                continue;
            };
            if let Some(status) = persisted.status {
                state.status = status;
            }
            if persisted.route.is_some() {
                state.route = persisted.route;
            }
            if persisted.started_at.is_some() {
                state.started_at = persisted.started_at;
            }
            if persisted.finished_at.is_some() {
                state.finished_at = persisted.finished_at;
            }
            if persisted.error.is_some() {
                state.error = persisted.error;
            }
            if persisted.namespace.is_some() {
                state.namespace = persisted.namespace;
            }
        }
    }
}
