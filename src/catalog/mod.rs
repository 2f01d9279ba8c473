//! # Component Catalog
//!
//! Static, read-once description of every deployable component and every
//! offer. The catalog is validated when it is built and never mutated
//! afterwards; the orchestrator shares it behind an `Arc`.
//!
//! ```rust
//! use deployer_core::catalog::Catalog;
//!
//! let catalog = Catalog::from_json_str(r#"{
//!     "components": [
//!         {"id": "web", "name": "Web", "action": "deploy-component.yml"}
//!     ]
//! }"#).unwrap();
//!
//! let web = catalog.component("web").unwrap();
//! assert_eq!(web.namespace(), "web");
//! assert!(web.primary_step().is_some());
//! ```

pub mod definitions;

pub use definitions::{
    ComponentDefinition, EnvVarTemplate, OfferDefinition, StepDefinition, StepPurpose,
};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::constants::system::DEFAULT_CLEANUP_ACTION;
use crate::error::{DeployerError, Result};

fn default_cleanup_action() -> String {
    DEFAULT_CLEANUP_ACTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    components: Vec<ComponentDefinition>,
    #[serde(default)]
    offers: Vec<OfferDefinition>,
    /// Runner action that tears down one namespace
    #[serde(default = "default_cleanup_action")]
    cleanup_action: String,
}

impl Catalog {
    pub fn new(
        components: Vec<ComponentDefinition>,
        offers: Vec<OfferDefinition>,
    ) -> Result<Self> {
        Self {
            components,
            offers,
            cleanup_action: default_cleanup_action(),
        }
        .validated()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(raw)
            .map_err(|e| DeployerError::InvalidCatalog(format!("unparseable catalog: {e}")))?;
        catalog.validated()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeployerError::InvalidCatalog(format!("cannot read {}: {e}", path.display()))
        })?;
        let catalog = Self::from_json_str(&raw)?;
        debug!(
            path = %path.display(),
            components = catalog.components.len(),
            offers = catalog.offers.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    fn validated(mut self) -> Result<Self> {
        let mut seen = HashSet::new();
        for component in &mut self.components {
            component.normalize();

            if !seen.insert(component.id.clone()) {
                return Err(DeployerError::InvalidCatalog(format!(
                    "duplicate component id '{}'",
                    component.id
                )));
            }
            if component.steps.is_empty() {
                return Err(DeployerError::InvalidCatalog(format!(
                    "component '{}' has no steps",
                    component.id
                )));
            }
            let primaries = component.steps.iter().filter(|s| s.primary).count();
            if primaries != 1 {
                return Err(DeployerError::InvalidCatalog(format!(
                    "component '{}' must have exactly one primary step, found {primaries}",
                    component.id
                )));
            }
        }

        for offer in &self.offers {
            if let Some(unknown) = offer.component_ids.iter().find(|id| !seen.contains(*id)) {
                return Err(DeployerError::InvalidCatalog(format!(
                    "offer '{}' references unknown component '{unknown}'",
                    offer.id
                )));
            }
        }

        Ok(self)
    }

    pub fn components(&self) -> &[ComponentDefinition] {
        &self.components
    }

    pub fn offers(&self) -> &[OfferDefinition] {
        &self.offers
    }

    pub fn cleanup_action(&self) -> &str {
        &self.cleanup_action
    }

    pub fn component(&self, id: &str) -> Option<&ComponentDefinition> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn offer(&self, id: &str) -> Option<&OfferDefinition> {
        self.offers.iter().find(|o| o.id == id)
    }

    /// Every component, ascending by `order`; ties keep catalog order
    pub fn schedule_all(&self) -> Vec<&ComponentDefinition> {
        let mut schedule: Vec<_> = self.components.iter().collect();
        schedule.sort_by_key(|c| c.order);
        schedule
    }

    /// The offer's components, ordered the same way as [`Self::schedule_all`]
    pub fn schedule_offer(&self, offer_id: &str) -> Result<Vec<&ComponentDefinition>> {
        let offer = self
            .offer(offer_id)
            .ok_or_else(|| DeployerError::UnknownOffer(offer_id.to_string()))?;
        Ok(self
            .schedule_all()
            .into_iter()
            .filter(|c| offer.component_ids.contains(&c.id))
            .collect())
    }

    /// Distinct namespaces of the given components, first occurrence wins
    pub fn namespaces_of<'a>(
        components: impl IntoIterator<Item = &'a ComponentDefinition>,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        components
            .into_iter()
            .map(|c| c.namespace().to_string())
            .filter(|ns| seen.insert(ns.clone()))
            .collect()
    }
}
