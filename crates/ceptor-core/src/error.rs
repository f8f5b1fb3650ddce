//! Error types for the capture pipeline.

use thiserror::Error;

/// Errors raised inside the capture pipeline.
///
/// None of these reach the transport hook: the capture engine logs and
/// swallows them so the intercepted network call is never affected.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configured redaction pattern failed to compile.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The persistence collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    NotFound(i64),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (e.g., reading a configuration file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
