//! Error types for evaluation orchestration

use thiserror::Error;

use crate::shard::IndexRange;

/// Errors surfaced by the orchestration layer.
///
/// Every variant is reported synchronously to the operator; nothing is
/// swallowed or retried behind the scenes.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Contradictory or missing command-line flags.
    #[error("usage error: {0}")]
    Usage(String),

    /// Unknown dataset, empty resolved dataset list, or a configuration
    /// that failed post-merge validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A dispatched shard process terminated abnormally. Fatal for the
    /// whole job; no partial aggregation is emitted.
    #[error("worker for shard {shard} exited with code {exit_code}")]
    Worker { shard: IndexRange, exit_code: i32 },

    /// No usable accelerator device found.
    #[error("environment error: {0}")]
    Environment(String),

    /// The inference engine collaborator failed during an in-process call.
    #[error("engine error: {0}")]
    Engine(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error (config files, override values)
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error (snapshots, manifests)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, EvalError>;
