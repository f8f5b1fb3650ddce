//! Storage error types.

use ceptor_core::{CoreError, TransactionId};
use thiserror::Error;

/// Failures of the SQLite transaction store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Header columns and stored settings are JSON.
    #[error("Stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// Creating the database directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// No data directory, or the connection lock is poisoned.
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// The file was written by a newer schema.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::TransactionNotFound(id) => CoreError::NotFound(id),
            other => CoreError::Store(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
