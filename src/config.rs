//! Configuration System
//!
//! Tunables for the cache budget, scoring and timing heuristics. Loaded from
//! defaults, an optional TOML file, and `LAZYROWS_*` environment variables, in
//! increasing order of precedence.

use crate::error::QueryError;
use crate::logging::LoggingConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "LAZYROWS";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Total score the cache may hold before evicting oldest entries
    #[serde(default = "default_cache_max_score")]
    pub cache_max_score: u64,

    /// Score above which a query emits `highScore`
    #[serde(default = "default_high_score_threshold")]
    pub high_score_threshold: u64,

    /// Data fetches slower than this emit `longRun`
    #[serde(default = "default_long_run_threshold_ms")]
    pub long_run_threshold_ms: u64,

    /// How long a reactive update may load before the loading signal is raised
    #[serde(default = "default_load_grace_period_ms")]
    pub load_grace_period_ms: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_cache_max_score() -> u64 {
    5 * 10 * 1024
}

fn default_high_score_threshold() -> u64 {
    10 * 1024 * 1024 // 10 MB
}

fn default_long_run_threshold_ms() -> u64 {
    5000
}

fn default_load_grace_period_ms() -> u64 {
    250
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_max_score: default_cache_max_score(),
            high_score_threshold: default_high_score_threshold(),
            long_run_threshold_ms: default_long_run_threshold_ms(),
            load_grace_period_ms: default_load_grace_period_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl QueryConfig {
    pub fn long_run_threshold(&self) -> Duration {
        Duration::from_millis(self.long_run_threshold_ms)
    }

    pub fn load_grace_period(&self) -> Duration {
        Duration::from_millis(self.load_grace_period_ms)
    }

    /// Parse a TOML document, applying defaults for missing keys.
    pub fn from_toml_str(raw: &str) -> Result<Self, QueryError> {
        let config: QueryConfig =
            toml::from_str(raw).map_err(|e| QueryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.cache_max_score == 0 {
            return Err(QueryError::Config(
                "cache_max_score must be greater than zero".to_string(),
            ));
        }
        if self.load_grace_period_ms == 0 {
            return Err(QueryError::Config(
                "load_grace_period_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Layered configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults overridden by environment variables.
    pub fn load() -> Result<QueryConfig, QueryError> {
        let builder = Self::builder_with_defaults()?;
        Self::finish(builder)
    }

    /// Defaults, then `path`, then environment variables.
    pub fn load_from_file(path: &Path) -> Result<QueryConfig, QueryError> {
        let builder = Self::builder_with_defaults()?.add_source(File::from(path).required(true));
        debug!(config_path = %path.display(), "Loading query configuration file");
        Self::finish(builder)
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = QueryConfig::default();
        Config::builder()
            .set_default("cache_max_score", defaults.cache_max_score)?
            .set_default("high_score_threshold", defaults.high_score_threshold)?
            .set_default("long_run_threshold_ms", defaults.long_run_threshold_ms)?
            .set_default("load_grace_period_ms", defaults.load_grace_period_ms)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<QueryConfig, QueryError> {
        let config: QueryConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
