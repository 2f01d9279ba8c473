//! Shared fixtures for orchestrator integration tests.
//!
//! Not every suite uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use deployer_core::catalog::Catalog;
use deployer_core::config::EngineSettings;
use deployer_core::events::{DeployEvent, EventSubscriber, SubscriberError};
use deployer_core::models::ConfigUpdate;
use deployer_core::orchestration::{
    ClusterObservation, ClusterProbe, Orchestrator, OutputSink, StepOutcome, StepParameters,
    StepRunner,
};
use deployer_core::persistence::{MemorySnapshotStore, SnapshotStore};

/// Canned behavior for one runner action
#[derive(Clone, Default)]
pub struct Script {
    pub chunks: Vec<String>,
    pub success: bool,
    pub panic: bool,
    /// Run blocks until this is notified
    pub gate: Option<Arc<Notify>>,
}

impl Script {
    pub fn ok(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            success: true,
            ..Default::default()
        }
    }

    pub fn fail(chunks: &[&str]) -> Self {
        Self {
            success: false,
            ..Self::ok(chunks)
        }
    }

    pub fn panics() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunnerCall {
    pub action: String,
    pub parameters: StepParameters,
}

impl RunnerCall {
    pub fn namespace(&self) -> &str {
        self.parameters
            .get("namespace")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }
}

/// Step runner driven by scripts keyed by `action@namespace` or `action`.
/// Unscripted actions succeed with no output.
#[derive(Default)]
pub struct ScriptedStepRunner {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<RunnerCall>>,
}

impl ScriptedStepRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, key: &str, script: Script) {
        self.scripts.lock().insert(key.to_string(), script);
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for_namespace(&self, namespace: &str) -> Vec<RunnerCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.namespace() == namespace)
            .collect()
    }

    fn lookup(&self, action: &str, parameters: &StepParameters) -> Script {
        let namespace = parameters
            .get("namespace")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let scripts = self.scripts.lock();
        scripts
            .get(&format!("{action}@{namespace}"))
            .or_else(|| scripts.get(action))
            .cloned()
            .unwrap_or_else(|| Script::ok(&[]))
    }
}

#[async_trait]
impl StepRunner for ScriptedStepRunner {
    async fn run(
        &self,
        action: &str,
        parameters: &StepParameters,
        on_output: OutputSink<'_>,
    ) -> StepOutcome {
        self.calls.lock().push(RunnerCall {
            action: action.to_string(),
            parameters: parameters.clone(),
        });
        let script = self.lookup(action, parameters);

        if let Some(gate) = &script.gate {
            gate.notified().await;
        }
        if script.panic {
            panic!("runner exploded while running {action}");
        }

        let mut output = String::new();
        for chunk in &script.chunks {
            on_output(chunk);
            output.push_str(chunk);
            tokio::task::yield_now().await;
        }

        if script.success {
            StepOutcome::succeeded(output)
        } else {
            StepOutcome::failed(output, 2)
        }
    }
}

/// Records every event it receives
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<DeployEvent>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<DeployEvent> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(DeployEvent::event_type).collect()
    }

    pub fn for_job(&self, job_id: Uuid) -> Vec<DeployEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.job_id() == Some(job_id))
            .collect()
    }

    pub fn outputs_for(&self, job_id: Uuid) -> Vec<String> {
        self.for_job(job_id)
            .into_iter()
            .filter_map(|e| match e {
                DeployEvent::JobOutput { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }
}

impl EventSubscriber for EventRecorder {
    fn handle_event(&self, event: &DeployEvent) -> Result<(), SubscriberError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn subscriber_name(&self) -> &str {
        "event_recorder"
    }
}

/// Cluster probe answering from a table keyed by namespace
#[derive(Default)]
pub struct FakeProbe {
    pub observations: HashMap<String, ClusterObservation>,
    pub workloads: HashMap<String, String>,
    pub env_updates: Mutex<Vec<(String, String, Vec<(String, String)>)>>,
}

#[async_trait]
impl ClusterProbe for FakeProbe {
    async fn login(&self, _api_url: &str, _token: &str) -> bool {
        true
    }

    async fn observe(&self, namespace: &str, _app: &str) -> ClusterObservation {
        self.observations.get(namespace).cloned().unwrap_or_default()
    }

    async fn find_workload(&self, namespace: &str, _app: &str) -> Option<String> {
        self.workloads.get(namespace).cloned()
    }

    async fn set_workload_env(&self, namespace: &str, resource: &str, vars: &[(String, String)]) -> bool {
        self.env_updates
            .lock()
            .push((namespace.to_string(), resource.to_string(), vars.to_vec()));
        true
    }
}

pub const CATALOG: &str = r#"{
    "components": [
        {"id": "web", "name": "Web", "order": 1, "port": 3000,
         "action": "deploy-component.yml", "context_dir": "web"},
        {"id": "agent", "name": "Agent", "order": 2, "namespace": "agent-ns",
         "env": [
            {"key": "K8S_API_URL", "value": "{{ocp_api_url}}"},
            {"key": "K8S_BEARER_TOKEN", "value": "{{sa_token}}"},
            {"key": "OPENAI_API_KEY", "value": "{{openai_api_key}}"}
         ],
         "steps": [
            {"id": "redis", "name": "Redis", "action": "deploy-redis.yml"},
            {"id": "rbac", "name": "RBAC", "action": "setup-rbac.yml",
             "purpose": "access-bootstrap", "extra_params": {"sa_name": "mcp-sa"}},
            {"id": "app", "name": "Agent App", "action": "deploy-component.yml", "context_dir": "agent"}
         ]},
        {"id": "ordered", "name": "Ordered", "order": 3,
         "steps": [
            {"id": "build", "name": "Build", "action": "deploy-component.yml", "primary": true},
            {"id": "notify", "name": "Notify", "action": "notify.yml"}
         ]}
    ],
    "offers": [
        {"id": "demo", "name": "Demo", "component_ids": ["agent", "web"]}
    ]
}"#;

pub const BATCH_CATALOG: &str = r#"{
    "components": [
        {"id": "c", "name": "Gamma", "order": 3, "action": "deploy-component.yml"},
        {"id": "a", "name": "Alpha", "order": 1, "action": "deploy-component.yml"},
        {"id": "b", "name": "Beta", "order": 2, "required": true, "action": "deploy-component.yml"}
    ],
    "offers": [
        {"id": "pair", "name": "Pair", "component_ids": ["c", "a"]}
    ]
}"#;

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        job_poll_interval_ms: 20,
        ..Default::default()
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub runner: Arc<ScriptedStepRunner>,
    pub persistence: Arc<MemorySnapshotStore>,
    pub recorder: Arc<EventRecorder>,
}

pub fn harness(catalog: &str) -> Harness {
    harness_with_store(catalog, Arc::new(MemorySnapshotStore::new()))
}

pub fn harness_with_store(catalog: &str, persistence: Arc<MemorySnapshotStore>) -> Harness {
    let runner = ScriptedStepRunner::new();
    let orchestrator = build(catalog, runner.clone(), persistence.clone());
    let recorder = Arc::new(EventRecorder::default());
    orchestrator.subscribe(recorder.clone());
    Harness {
        orchestrator,
        runner,
        persistence,
        recorder,
    }
}

pub fn build(
    catalog: &str,
    runner: Arc<dyn StepRunner>,
    persistence: Arc<dyn SnapshotStore>,
) -> Orchestrator {
    Orchestrator::builder(Catalog::from_json_str(catalog).expect("valid test catalog"))
        .with_settings(test_settings())
        .with_runner(runner)
        .with_persistence(persistence)
        .build()
        .expect("orchestrator builds")
}

pub fn configure(orchestrator: &Orchestrator) {
    let mut secrets = std::collections::BTreeMap::new();
    secrets.insert("openai_api_key".to_string(), "sk-test".to_string());
    orchestrator.update_config(ConfigUpdate {
        api_url: Some("https://api.cluster.example:6443".to_string()),
        token: Some("user-token".to_string()),
        repo_url: Some("https://git.example.com/demo.git".to_string()),
        secrets: Some(secrets),
        ..Default::default()
    });
}

/// Wait for a job with a generous upper bound so a hang fails the test
pub async fn wait(orchestrator: &Orchestrator, job_id: Uuid) -> deployer_core::JobStatus {
    tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_for_job(job_id))
        .await
        .expect("job finished in time")
        .expect("job exists")
}
