//! Per-component single-flight guard.
//!
//! At most one pipeline or cleanup may touch a component at a time. A claim
//! is an RAII handle; dropping it releases the component.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{DeployerError, Result};

/// What currently holds a component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Deploy,
    Cleanup,
    Refresh,
}

#[derive(Debug, Default)]
pub struct SingleFlight {
    active: DashMap<String, ClaimKind>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(self: &Arc<Self>, component_id: &str, kind: ClaimKind) -> Result<Claim> {
        match self.active.entry(component_id.to_string()) {
            Entry::Occupied(_) => Err(DeployerError::DeployInProgress(component_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(kind);
                Ok(Claim {
                    owner: Arc::clone(self),
                    component_id: component_id.to_string(),
                })
            }
        }
    }

    /// Claim every id or none of them
    pub fn try_claim_all<'a>(
        self: &Arc<Self>,
        component_ids: impl IntoIterator<Item = &'a str>,
        kind: ClaimKind,
    ) -> Result<Vec<Claim>> {
        let mut claims = Vec::new();
        for id in component_ids {
            // already-held claims are released on the early return
            claims.push(self.try_claim(id, kind)?);
        }
        Ok(claims)
    }

    pub fn is_active(&self, component_id: &str) -> bool {
        self.active.contains_key(component_id)
    }
}

/// Held while a component is being worked on
#[derive(Debug)]
pub struct Claim {
    owner: Arc<SingleFlight>,
    component_id: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.owner.active.remove(&self.component_id);
    }
}
