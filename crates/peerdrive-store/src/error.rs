//! Error types for the queue store.

use peerdrive_core::ErrorKind;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A non-upsert enqueue collided with a pending entry.
    #[error("duplicate queue entry: {0}")]
    Duplicate(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Lock poisoned or blocking task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Storage failures are always system errors.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::System
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
