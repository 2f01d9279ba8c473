//! # Component State Store
//!
//! Owns [`GlobalConfig`] and one [`ComponentState`] per catalog component.
//!
//! Mutations are serialized by a commit gate taken before the state lock. The
//! state lock covers the in-memory update and the snapshot capture only; the
//! snapshot write and event publishing happen after it is released but while
//! the gate is still held. Snapshots and events therefore follow mutation
//! order, and readers never wait on disk IO. A subscriber may read the store
//! from its handler.
//!
//! Log appends are the exception: they touch memory only. Live output reaches
//! observers through `job-output` events, and logs are never persisted.

use parking_lot::{Mutex, ReentrantMutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::events::{DeployEvent, EventBroadcaster};
use crate::logging::log_error;
use crate::models::{ComponentState, ConfigUpdate, GlobalConfig, MaskedConfig, Snapshot};
use crate::persistence::SnapshotStore;
use crate::state_machine::ComponentStatus;

struct StoreInner {
    config: GlobalConfig,
    components: BTreeMap<String, ComponentState>,
}

pub struct StateStore {
    inner: Mutex<StoreInner>,
    /// Held across update, save and publish; reentrant for subscribers that
    /// write back into the store
    commit_gate: ReentrantMutex<()>,
    persistence: Arc<dyn SnapshotStore>,
    broadcaster: Arc<EventBroadcaster>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("components", &self.inner.lock().components.len())
            .finish()
    }
}

impl StateStore {
    /// Build default state for `catalog` and overlay the last snapshot.
    ///
    /// An unreadable snapshot is logged and ignored; the store starts from
    /// defaults rather than refusing to start.
    pub fn initialize(
        catalog: &Catalog,
        defaults: GlobalConfig,
        persistence: Arc<dyn SnapshotStore>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        let mut config = defaults;
        let mut components: BTreeMap<String, ComponentState> = catalog
            .components()
            .iter()
            .map(|c| (c.id.clone(), ComponentState::default()))
            .collect();

        match persistence.load() {
            Ok(Some(snapshot)) => {
                snapshot.merge_into(&mut config, &mut components);
                info!(components = components.len(), "Restored state from snapshot");
            }
            Ok(None) => debug!("Starting with default state"),
            Err(e) => warn!(error = %e, "Ignoring unreadable snapshot"),
        }

        for (id, state) in &components {
            if state.status == ComponentStatus::Deploying {
                warn!(
                    component_id = %id,
                    "Component was deploying when the previous process stopped; run a status refresh to reconcile"
                );
            }
        }

        Self {
            inner: Mutex::new(StoreInner { config, components }),
            commit_gate: ReentrantMutex::new(()),
            persistence,
            broadcaster,
        }
    }

    /// Write a captured snapshot. Callers hold the commit gate, not the state
    /// lock.
    fn persist(&self, snapshot: &Snapshot) {
        let save = || self.persistence.save(snapshot);
        let result = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(save)
            }
            _ => save(),
        };
        if let Err(e) = result {
            log_error("state_store", "persist", &e.to_string(), None);
        }
    }

    fn publish_all(&self, events: &[DeployEvent]) {
        for event in events {
            self.broadcaster.publish(event);
        }
    }

    /// Unmasked configuration, for the pipeline only
    pub(crate) fn config(&self) -> GlobalConfig {
        self.inner.lock().config.clone()
    }

    pub fn masked_config(&self) -> MaskedConfig {
        self.inner.lock().config.masked()
    }

    /// Apply a user update, persist, and publish the masked result
    pub fn update_config(&self, update: ConfigUpdate) -> MaskedConfig {
        let _gate = self.commit_gate.lock();
        let (snapshot, masked) = {
            let mut inner = self.inner.lock();
            let changed = inner.config.apply(update);
            debug!(changed = changed, "Configuration updated");
            (
                Snapshot::capture(&inner.config, &inner.components),
                inner.config.masked(),
            )
        };
        self.persist(&snapshot);
        self.broadcaster.publish(&DeployEvent::ConfigUpdate {
            data: masked.clone(),
        });
        masked
    }

    /// Store or clear the derived service-account token
    pub fn set_derived_token(&self, token: Option<String>) {
        let _gate = self.commit_gate.lock();
        let (snapshot, masked) = {
            let mut inner = self.inner.lock();
            if inner.config.sa_token == token {
                return;
            }
            inner.config.sa_token = token;
            (
                Snapshot::capture(&inner.config, &inner.components),
                inner.config.masked(),
            )
        };
        self.persist(&snapshot);
        self.broadcaster
            .publish(&DeployEvent::ConfigUpdate { data: masked });
    }

    pub fn component(&self, component_id: &str) -> Option<ComponentState> {
        self.inner.lock().components.get(component_id).cloned()
    }

    pub fn components(&self) -> BTreeMap<String, ComponentState> {
        self.inner.lock().components.clone()
    }

    /// Mutate one component, persist, and publish the new state. Returns the
    /// updated state, or `None` when the id is unknown.
    pub fn update_component<F>(&self, component_id: &str, mutate: F) -> Option<ComponentState>
    where
        F: FnOnce(&mut ComponentState),
    {
        let _gate = self.commit_gate.lock();
        let (snapshot, updated) = {
            let mut inner = self.inner.lock();
            let state = inner.components.get_mut(component_id)?;
            mutate(state);
            let updated = state.clone();
            (Snapshot::capture(&inner.config, &inner.components), updated)
        };
        self.persist(&snapshot);
        self.broadcaster.publish(&DeployEvent::ComponentUpdate {
            component_id: component_id.to_string(),
            data: updated.clone(),
        });
        Some(updated)
    }

    /// Mutate several components under one snapshot write
    pub fn update_components<F>(&self, component_ids: &[String], mut mutate: F)
    where
        F: FnMut(&mut ComponentState),
    {
        let _gate = self.commit_gate.lock();
        let (snapshot, events) = {
            let mut inner = self.inner.lock();
            let mut events = Vec::with_capacity(component_ids.len());
            for id in component_ids {
                if let Some(state) = inner.components.get_mut(id) {
                    mutate(state);
                    events.push(DeployEvent::ComponentUpdate {
                        component_id: id.clone(),
                        data: state.clone(),
                    });
                }
            }
            (Snapshot::capture(&inner.config, &inner.components), events)
        };
        self.persist(&snapshot);
        self.publish_all(&events);
    }

    pub fn append_component_log(&self, component_id: &str, chunk: &str) {
        if let Some(state) = self.inner.lock().components.get_mut(component_id) {
            state.logs.push_str(chunk);
        }
    }
}
