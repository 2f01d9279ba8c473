//! # Variable Resolver
//!
//! Expands `{{name}}` placeholders in environment templates from a snapshot
//! of [`GlobalConfig`].
//!
//! Recognized names:
//! - `ocp_api_url`: cluster endpoint
//! - `sa_token`: derived service-account token, falling back to the primary
//!   credential
//! - `namespace`, `git_repo_url`: runtime defaults
//! - any key of `GlobalConfig::secrets`
//!
//! A placeholder whose name is unknown, or whose value is empty, stays in the
//! output verbatim. Partially configured deployments therefore degrade at
//! runtime instead of failing here.

use serde::{Deserialize, Serialize};

use crate::catalog::EnvVarTemplate;
use crate::constants::placeholders;
use crate::models::GlobalConfig;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Environment variable after template expansion, as handed to the runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvVar {
    pub key: String,
    pub value: String,
}

fn lookup<'a>(name: &str, config: &'a GlobalConfig) -> Option<&'a str> {
    let value = match name {
        placeholders::API_URL => config.api_url.as_str(),
        placeholders::SA_TOKEN => config.effective_workload_token(),
        placeholders::NAMESPACE => config.namespace.as_str(),
        placeholders::REPO_URL => config.repo_url.as_str(),
        other => config.secrets.get(other)?.as_str(),
    };
    (!value.is_empty()).then_some(value)
}

/// Substitute every resolvable placeholder in `template`
pub fn resolve(template: &str, config: &GlobalConfig) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };

        let name = after_open[..end].trim();
        match lookup(name, config) {
            Some(value) => {
                out.push_str(&rest[..start]);
                out.push_str(value);
                rest = &after_open[end + CLOSE.len()..];
            }
            None => {
                // A placeholder may start inside this span; emit one brace and rescan
                out.push_str(&rest[..=start]);
                rest = &rest[start + 1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Resolve every template of a component, preserving order
pub fn resolve_env(templates: &[EnvVarTemplate], config: &GlobalConfig) -> Vec<ResolvedEnvVar> {
    templates
        .iter()
        .map(|t| ResolvedEnvVar {
            key: t.key.clone(),
            value: resolve(&t.value, config),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> GlobalConfig {
        let mut config = GlobalConfig::new("demo", "https://git/repo.git");
        config.api_url = "https://api.cluster:6443".to_string();
        config.token = "user-token".to_string();
        config
            .secrets
            .insert("openai_api_key".to_string(), "sk-abc".to_string());
        config
    }

    #[test]
    fn test_resolves_known_placeholders() {
        let config = config();
        assert_eq!(resolve("{{ocp_api_url}}", &config), "https://api.cluster:6443");
        assert_eq!(resolve("Bearer {{sa_token}}", &config), "Bearer user-token");
        assert_eq!(resolve("{{ openai_api_key }}", &config), "sk-abc");
        assert_eq!(
            resolve("{{namespace}}@{{git_repo_url}}", &config),
            "demo@https://git/repo.git"
        );
    }

    #[test]
    fn test_derived_token_wins_over_primary_credential() {
        let mut config = config();
        config.sa_token = Some("sa-xyz".to_string());
        assert_eq!(resolve("{{sa_token}}", &config), "sa-xyz");
    }

    #[test]
    fn test_unresolvable_placeholders_stay_literal() {
        let mut config = config();
        config.api_url.clear();
        assert_eq!(resolve("{{unknown}}", &config), "{{unknown}}");
        assert_eq!(resolve("url={{ocp_api_url}}", &config), "url={{ocp_api_url}}");
        assert_eq!(resolve("open {{ never closed", &config), "open {{ never closed");
    }

    #[test]
    fn test_stray_braces_do_not_hide_later_placeholders() {
        let config = config();
        assert_eq!(resolve("{{{sa_token}}}", &config), "{user-token}");
        assert_eq!(
            resolve("lit {{ x then {{sa_token}}", &config),
            "lit {{ x then user-token"
        );
        assert_eq!(
            resolve(r#"{{"k":"{{sa_token}}"}}"#, &config),
            r#"{{"k":"user-token"}}"#
        );
        assert_eq!(
            resolve("{{unknown}} {{openai_api_key}}", &config),
            "{{unknown}} sk-abc"
        );
    }

    #[test]
    fn test_replaces_every_occurrence() {
        assert_eq!(
            resolve("{{sa_token}}:{{sa_token}}", &config()),
            "user-token:user-token"
        );
    }

    #[test]
    fn test_resolve_env_keeps_order() {
        let templates = vec![
            EnvVarTemplate {
                key: "K8S_API_URL".to_string(),
                value: "{{ocp_api_url}}".to_string(),
            },
            EnvVarTemplate {
                key: "K8S_SKIP_TLS_VERIFY".to_string(),
                value: "true".to_string(),
            },
        ];
        let resolved = resolve_env(&templates, &config());
        assert_eq!(resolved[0].key, "K8S_API_URL");
        assert_eq!(resolved[0].value, "https://api.cluster:6443");
        assert_eq!(resolved[1].value, "true");
    }

    proptest! {
        #[test]
        fn prop_text_without_placeholders_is_unchanged(s in "[^{}]*") {
            prop_assert_eq!(resolve(&s, &config()), s);
        }

        #[test]
        fn prop_unknown_names_round_trip(name in "[a-z_]{1,12}", prefix in "[a-z ]{0,8}") {
            prop_assume!(lookup(&name, &config()).is_none());
            let template = format!("{prefix}{{{{{name}}}}}");
            prop_assert_eq!(resolve(&template, &config()), template);
        }
    }
}
