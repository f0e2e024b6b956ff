//! Top-level process configuration: merges defaults, a YAML file, and
//! environment overrides into one validated config.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DispatcherFlags;
use crate::logging::LogConfig;

/// Whole-process configuration for the `dagflowctl` binary (and any other
/// embedder of this crate that wants a single config entry point).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Dispatcher feature flags.
    #[serde(default)]
    pub dispatcher: DispatcherFlags,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LogConfig,
    /// Path to the policy configuration YAML. Empty means no policy
    /// gates are enforced.
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
    /// SQLite database URL for the context store. Empty means use the
    /// in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Default per-node timeout in seconds, applied when a node does not
    /// declare its own.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
    /// Engine-wide concurrency cap. `None` means bounded only by the
    /// ready-set size.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Failures loading the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The merged configuration failed to deserialize or validate.
    #[error("failed to load configuration: {0}")]
    Load(String),
    /// `max_concurrency` was set to zero, which would make every workflow
    /// unschedulable.
    #[error("max_concurrency must be greater than zero")]
    InvalidMaxConcurrency,
}

impl AppConfig {
    /// Load configuration by merging built-in defaults, `config_path` (if
    /// it exists), and `DAGFLOW_`-prefixed environment variables.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(config_path.as_ref()))
            .merge(Env::prefixed("DAGFLOW_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidMaxConcurrency);
        }
        Ok(())
    }
}
