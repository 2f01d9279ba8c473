//! Settings Loader
//!
//! Environment-aware layering through the `config` crate: built-in defaults,
//! a base TOML file, an optional per-environment TOML file, then
//! `DEPLOYER__`-prefixed environment variables (`__` separates nesting, e.g.
//! `DEPLOYER__RUNNER__PROGRAM`).

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::EngineSettings;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_file: PathBuf,
    environment: String,
    env_prefix: String,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            config_file: PathBuf::from("config/deployer.toml"),
            environment: Self::detect_environment(),
            env_prefix: "DEPLOYER".to_string(),
        }
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    /// Explicit environment, useful for tests that must not touch process env
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn load(&self) -> Result<EngineSettings> {
        let overlay = Self::environment_file(&self.config_file, &self.environment);
        debug!(
            environment = %self.environment,
            base = %self.config_file.display(),
            overlay = %overlay.display(),
            "Loading engine settings"
        );

        let settings: EngineSettings = Config::builder()
            .add_source(Config::try_from(&EngineSettings::default())?)
            .add_source(File::from(self.config_file.clone()).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// `config/deployer.toml` + `production` → `config/deployer.production.toml`
    fn environment_file(base: &Path, environment: &str) -> PathBuf {
        let stem = base
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("deployer");
        let extension = base.extension().and_then(|s| s.to_str()).unwrap_or("toml");
        base.with_file_name(format!("{stem}.{environment}.{extension}"))
    }

    pub fn detect_environment() -> String {
        env::var("DEPLOYER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsLoader::new()
            .with_config_file(dir.path().join("deployer.toml"))
            .with_environment("test")
            .with_env_prefix("DEPLOYER_LOADER_TEST_NONE")
            .load()
            .unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("deployer.toml");
        fs::write(
            &base,
            "job_poll_interval_ms = 250\ndata_dir = \"/var/lib/deployer\"\n[runner]\nprogram = \"echo\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("deployer.production.toml"),
            "job_poll_interval_ms = 500\n",
        )
        .unwrap();

        let settings = SettingsLoader::new()
            .with_config_file(&base)
            .with_environment("production")
            .with_env_prefix("DEPLOYER_LOADER_TEST_NONE")
            .load()
            .unwrap();

        assert_eq!(settings.job_poll_interval_ms, 500);
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/deployer"));
        assert_eq!(settings.runner.program, "echo");
        // untouched nested defaults survive
        assert_eq!(settings.runner.inventory, PathBuf::from("inventory"));
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("deployer.toml");
        fs::write(&base, "job_poll_interval_ms = 0\n").unwrap();
        let result = SettingsLoader::new()
            .with_config_file(&base)
            .with_environment("test")
            .with_env_prefix("DEPLOYER_LOADER_TEST_NONE")
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_file_name() {
        assert_eq!(
            SettingsLoader::environment_file(Path::new("config/deployer.toml"), "test"),
            PathBuf::from("config/deployer.test.toml")
        );
    }
}
