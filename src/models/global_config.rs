//! Cluster connection settings and secrets held by the orchestrator.
//!
//! Secrets never leave through [`GlobalConfig::masked`]; an update that hands
//! the mask back leaves the stored value alone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::system::MASKED_SECRET;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    /// Cluster API endpoint
    pub api_url: String,
    /// Primary credential supplied by the user
    pub token: String,
    /// Default namespace; components normally carry their own
    pub namespace: String,
    /// Source repository the primary steps build from
    pub repo_url: String,
    /// Service-account token harvested from an access-bootstrap step
    pub sa_token: Option<String>,
    /// Additional secrets referenced by environment templates
    pub secrets: BTreeMap<String, String>,
}

/// Read view of [`GlobalConfig`] with every secret replaced by the mask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedConfig {
    pub api_url: String,
    pub token: String,
    pub namespace: String,
    pub repo_url: String,
    pub sa_token: String,
    pub secrets: BTreeMap<String, String>,
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub secrets: Option<BTreeMap<String, String>>,
}

fn mask(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        MASKED_SECRET.to_string()
    }
}

impl GlobalConfig {
    pub fn new(namespace: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            repo_url: repo_url.into(),
            ..Default::default()
        }
    }

    pub fn masked(&self) -> MaskedConfig {
        MaskedConfig {
            api_url: self.api_url.clone(),
            token: mask(&self.token),
            namespace: self.namespace.clone(),
            repo_url: self.repo_url.clone(),
            sa_token: mask(self.sa_token.as_deref().unwrap_or_default()),
            secrets: self
                .secrets
                .iter()
                .map(|(k, v)| (k.clone(), mask(v)))
                .collect(),
        }
    }

    /// Apply an update. Returns true when anything changed.
    ///
    /// The primary credential is kept when the update carries the mask or an
    /// empty string. A secret carrying the mask is kept; an empty one is
    /// removed.
    pub fn apply(&mut self, update: ConfigUpdate) -> bool {
        let before = self.clone();

        if let Some(api_url) = update.api_url {
            self.api_url = api_url;
        }
        if let Some(token) = update.token {
            if !token.is_empty() && token != MASKED_SECRET {
                self.token = token;
            }
        }
        if let Some(namespace) = update.namespace {
            self.namespace = namespace;
        }
        if let Some(repo_url) = update.repo_url {
            self.repo_url = repo_url;
        }
        for (name, value) in update.secrets.unwrap_or_default() {
            if value == MASKED_SECRET {
                continue;
            }
            if value.is_empty() {
                self.secrets.remove(&name);
            } else {
                self.secrets.insert(name, value);
            }
        }

        *self != before
    }

    /// Names of the settings a deploy or cleanup cannot run without
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_url.trim().is_empty() {
            missing.push("api_url");
        }
        if self.token.trim().is_empty() {
            missing.push("token");
        }
        missing
    }

    /// Token that workloads should use against the cluster API
    pub fn effective_workload_token(&self) -> &str {
        match self.sa_token.as_deref() {
            Some(token) if !token.is_empty() => token,
            _ => &self.token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> GlobalConfig {
        let mut config = GlobalConfig::new("demo", "https://example.com/repo.git");
        config.api_url = "https://api.cluster:6443".to_string();
        config.token = "sha256~secret".to_string();
        config
            .secrets
            .insert("openai_api_key".to_string(), "sk-123".to_string());
        config
    }

    #[test]
    fn test_masked_hides_secrets() {
        let masked = configured().masked();
        assert_eq!(masked.token, "***");
        assert_eq!(masked.sa_token, "");
        assert_eq!(masked.secrets["openai_api_key"], "***");
        assert_eq!(masked.api_url, "https://api.cluster:6443");

        let empty = GlobalConfig::default().masked();
        assert_eq!(empty.token, "");
    }

    #[test]
    fn test_round_trip_of_masked_values_is_noop() {
        let mut config = configured();
        let masked = config.masked();
        let changed = config.apply(ConfigUpdate {
            api_url: Some(masked.api_url),
            token: Some(masked.token),
            namespace: Some(masked.namespace),
            repo_url: Some(masked.repo_url),
            secrets: Some(masked.secrets),
        });
        assert!(!changed);
        assert_eq!(config.token, "sha256~secret");
        assert_eq!(config.secrets["openai_api_key"], "sk-123");
    }

    #[test]
    fn test_empty_token_is_ignored_but_empty_secret_removes() {
        let mut config = configured();
        let mut secrets = BTreeMap::new();
        secrets.insert("openai_api_key".to_string(), String::new());
        config.apply(ConfigUpdate {
            token: Some(String::new()),
            secrets: Some(secrets),
            ..Default::default()
        });
        assert_eq!(config.token, "sha256~secret");
        assert!(config.secrets.is_empty());
    }

    #[test]
    fn test_missing_required() {
        assert_eq!(GlobalConfig::default().missing_required(), vec!["api_url", "token"]);
        assert!(configured().missing_required().is_empty());
    }

    #[test]
    fn test_effective_workload_token_prefers_derived() {
        let mut config = configured();
        assert_eq!(config.effective_workload_token(), "sha256~secret");
        config.sa_token = Some("derived".to_string());
        assert_eq!(config.effective_workload_token(), "derived");
    }
}
