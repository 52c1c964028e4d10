//! Error types for stride-core

use thiserror::Error;

use crate::sync::SyncError;

/// Result type alias using stride-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stride-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Malformed record or invalid write
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write attempted on a soft-deleted record
    #[error("Record {0} is deleted and cannot be modified")]
    Tombstoned(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sync engine error
    #[error(transparent)]
    Sync(#[from] SyncError),
}
