use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What an individual step provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StepPurpose {
    /// Builds and deploys the component's own artifact
    Application,
    /// Supporting infrastructure such as a shared cache
    #[default]
    Infrastructure,
    /// Creates the service account whose token later steps consume
    AccessBootstrap,
}

/// One named runner action inside a component pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub purpose: StepPurpose,
    /// Build context inside the source repository (primary steps only)
    #[serde(default)]
    pub context_dir: Option<String>,
    /// Fixed parameters; the connection parameters override them
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    /// Explicit parameters; these override everything else
    #[serde(default)]
    pub extra_params: BTreeMap<String, Value>,
}

impl StepDefinition {
    pub fn harvests_token(&self) -> bool {
        self.purpose == StepPurpose::AccessBootstrap
    }
}

/// Environment variable template attached to a component's primary step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarTemplate {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    /// Position in batch schedules, ascending
    #[serde(default)]
    pub order: i32,
    /// A failed run of a required component stops the batch
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub context_dir: Option<String>,
    /// Shorthand for a single-step pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvVarTemplate>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl ComponentDefinition {
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(&self.id)
    }

    pub fn primary_step(&self) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.primary)
    }

    /// Build context for the primary step: the step's own, then the
    /// component's, then the component id
    pub fn context_dir_for(&self, step: &StepDefinition) -> String {
        step.context_dir
            .clone()
            .or_else(|| self.context_dir.clone())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn has_access_bootstrap(&self) -> bool {
        self.steps.iter().any(StepDefinition::harvests_token)
    }

    /// Turn the single-action shorthand into an explicit step list and mark
    /// the primary step when the catalog relied on `context_dir` to imply it
    pub(crate) fn normalize(&mut self) {
        if self.steps.is_empty() {
            if let Some(action) = self.action.clone() {
                self.steps.push(StepDefinition {
                    id: self.id.clone(),
                    name: self.name.clone(),
                    action,
                    primary: true,
                    purpose: StepPurpose::Application,
                    context_dir: self.context_dir.clone(),
                    defaults: BTreeMap::new(),
                    extra_params: BTreeMap::new(),
                });
            }
        }

        if !self.steps.iter().any(|step| step.primary) {
            for step in &mut self.steps {
                if step.context_dir.is_some() {
                    step.primary = true;
                }
            }
        }

        for step in &mut self.steps {
            if step.primary {
                step.purpose = StepPurpose::Application;
            }
        }
    }
}

/// Named subset of components deployed and cleaned up together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub component_ids: Vec<String>,
}
