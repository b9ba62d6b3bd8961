//! Error types for approvald

use approval_notify::NotifyError;
use approval_types::WorkflowError;
use thiserror::Error;

/// Errors that stop the daemon from starting or running
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Transport error: {0}")]
    Transport(#[from] NotifyError),
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
