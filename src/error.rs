//! Error types for dispatchd.

use std::time::Duration;

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors from the queue and store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: i64 },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Adapter selection and health-check errors.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Unknown CLI type: {cli_type}")]
    UnknownType { cli_type: String },

    #[error("Adapter {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("Health check for {name} timed out after {timeout:?}")]
    HealthCheckTimeout { name: String, timeout: Duration },
}

/// Subprocess execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stage prompt file: {0}")]
    PromptFile(std::io::Error),

    #[error("IO error while streaming output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution cancelled")]
    Cancelled,
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send via {channel}: {reason}")]
    SendFailed { channel: String, reason: String },
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, Error>;
