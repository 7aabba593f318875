//! Error types for taskspan.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A unit of work failed while running on the caller thread.
    #[error("work unit {action} failed: {message}")]
    WorkUnit { action: String, message: String },

    /// One or more pooled units failed; reported once from `await_all`.
    #[error("{} worker(s) failed: {}", .causes.len(), .causes.join("; "))]
    WorkerExecution { causes: Vec<String> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
