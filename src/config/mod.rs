//! Typed configuration from environment variables or a TOML file.
//!
//! Loaded once at startup. The dispatch backend is fixed from this config
//! when [`crate::dispatch::Workers`] is built and never changes afterwards.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const USE_WORKER_POOL_VAR: &str = "TASKSPAN_USE_WORKER_POOL";
pub const WORKER_THREADS_VAR: &str = "TASKSPAN_WORKER_THREADS";
pub const SPAN_OUTPUT_VAR: &str = "TASKSPAN_SPAN_OUTPUT";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Run units on the managed worker pool instead of the caller thread.
    #[serde(default = "default_use_worker_pool")]
    pub use_worker_pool: bool,
    /// Upper bound on pool threads. `None` keeps the runtime default.
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// JSON-lines file receiving span records. `None` keeps them in memory.
    #[serde(default)]
    pub span_output: Option<PathBuf>,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// The part of [`Config`] that selects and sizes the dispatch backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub use_worker_pool: bool,
    pub worker_threads: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            use_worker_pool: default_use_worker_pool(),
            worker_threads: None,
        }
    }
}

fn default_use_worker_pool() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_worker_pool: default_use_worker_pool(),
            worker_threads: None,
            span_output: None,
            otel_endpoint: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Every variable is
    /// optional; malformed values are errors.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            use_worker_pool: match optional_var(USE_WORKER_POOL_VAR) {
                Some(v) => parse_bool(USE_WORKER_POOL_VAR, &v)?,
                None => defaults.use_worker_pool,
            },
            worker_threads: match optional_var(WORKER_THREADS_VAR) {
                Some(v) => Some(parse_threads(&v)?),
                None => None,
            },
            span_output: optional_var(SPAN_OUTPUT_VAR).map(PathBuf::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Load configuration from a TOML file using the same keys as the
    /// struct fields.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if config.worker_threads == Some(0) {
            return Err(Error::Config("worker_threads must be at least 1".to_string()));
        }
        Ok(config)
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            use_worker_pool: self.use_worker_pool,
            worker_threads: self.worker_threads,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{name} must be a boolean, got {other:?}"))),
    }
}

fn parse_threads(value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(Error::Config(format!(
            "{WORKER_THREADS_VAR} must be a positive integer, got {value:?}"
        ))),
        Ok(n) => Ok(n),
    }
}
