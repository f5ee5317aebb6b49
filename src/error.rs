//! Error types for transcript-sync.

use std::time::Duration;

/// Top-level error type for a sync run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the upstream agent platform API.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} transport failure: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Invalid response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl UpstreamError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Client errors are final except 429, which the platform uses for rate limiting.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Http { status, .. } => *status == 429 || !(400..500).contains(status),
            UpstreamError::Transport { .. } | UpstreamError::Timeout { .. } => true,
            UpstreamError::Decode { .. } => false,
        }
    }
}

/// Errors raised by the sync orchestration itself.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Invalid schedule {expr}: {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("Agent {agent} failed: {reason}")]
    AgentFailed { agent: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
