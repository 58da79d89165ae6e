//! Logging System
//!
//! The library only emits `tracing` events. Hosts that want them rendered call
//! [`init_logging`] once at startup; environment variables take precedence over
//! the configuration, which takes precedence over defaults:
//!
//! - `LAZYROWS_LOG`: full filter directive, replaces level and module settings
//! - `LAZYROWS_LOG_FORMAT`: `text` or `json`
//! - `LAZYROWS_LOG_OUTPUT`: `stdout`, `stderr` or `file`
//! - `LAZYROWS_LOG_MODULES`: extra `module=level` pairs, comma separated

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    #[serde(default = "default_level")]
    pub level: String,

    /// text or json
    #[serde(default = "default_format")]
    pub format: String,

    /// stdout, stderr or file
    #[serde(default = "default_output")]
    pub output: String,

    /// Destination when `output` is "file"
    #[serde(default = "default_file")]
    pub file: PathBuf,

    /// ANSI colors for text output on a terminal stream
    #[serde(default = "default_color")]
    pub color: bool,

    /// Per-module level overrides, e.g. `lazyrows::cache = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_file() -> PathBuf {
    PathBuf::from("lazyrows.log")
}

fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            output: default_output(),
            file: default_file(),
            color: default_color(),
            modules: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

impl Format {
    fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(QueryError::Config(format!(
                "Invalid log format: {} (expected text or json)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Stdout,
    Stderr,
    File,
}

impl Output {
    fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "stdout" => Ok(Output::Stdout),
            "stderr" => Ok(Output::Stderr),
            "file" => Ok(Output::File),
            other => Err(QueryError::Config(format!(
                "Invalid log output: {} (expected stdout, stderr or file)",
                other
            ))),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if the configuration is invalid or a subscriber is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), QueryError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = env_filter(config)?;
    let format = Format::parse(&env_or("LAZYROWS_LOG_FORMAT", &config.format))?;
    let output = Output::parse(&env_or("LAZYROWS_LOG_OUTPUT", &config.output))?;

    let registry = Registry::default().with(filter);
    let layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339());

    let installed = match (output, format) {
        (Output::File, Format::Json) => registry
            .with(layer.json().with_writer(open_log_file(config)?))
            .try_init(),
        (Output::File, Format::Text) => registry
            .with(layer.with_ansi(false).with_writer(open_log_file(config)?))
            .try_init(),
        (Output::Stdout, Format::Json) => registry
            .with(layer.json().with_writer(std::io::stdout))
            .try_init(),
        (Output::Stdout, Format::Text) => registry
            .with(layer.with_ansi(config.color).with_writer(std::io::stdout))
            .try_init(),
        (Output::Stderr, Format::Json) => registry
            .with(layer.json().with_writer(std::io::stderr))
            .try_init(),
        (Output::Stderr, Format::Text) => registry
            .with(layer.with_ansi(config.color).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| QueryError::Config(format!("Failed to install logger: {}", e)))
}

fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback.to_string())
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, QueryError> {
    if let Ok(filter) = EnvFilter::try_from_env("LAZYROWS_LOG") {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let from_env = std::env::var("LAZYROWS_LOG_MODULES").unwrap_or_default();
    let env_pairs = from_env
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(module, level)| (module.trim().to_string(), level.trim().to_string()));
    let config_pairs = config
        .modules
        .iter()
        .map(|(module, level)| (module.clone(), level.clone()));

    config_pairs
        .chain(env_pairs)
        .try_fold(EnvFilter::new(&config.level), |filter, (module, level)| {
            Ok(filter.add_directive(directive(&module, &level)?))
        })
}

fn directive(module: &str, level: &str) -> Result<Directive, QueryError> {
    format!("{}={}", module, level)
        .parse()
        .map_err(|e| QueryError::Config(format!("Invalid log directive {}={}: {}", module, level, e)))
}

fn open_log_file(config: &LoggingConfig) -> Result<File, QueryError> {
    if let Some(dir) = config.file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| QueryError::Config(format!("Failed to create log directory: {}", e)))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)
        .map_err(|e| {
            QueryError::Config(format!("Failed to open log file {:?}: {}", config.file, e))
        })
}
