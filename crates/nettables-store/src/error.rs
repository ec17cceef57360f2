//! Error types for the store module.

use thiserror::Error;

use nettables_core::CoreError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entry-level rejection (type conflict, value too large for the wire).
    #[error("entry error: {0}")]
    Entry(#[from] CoreError),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Value serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Background task failed to complete.
    #[error("task error: {0}")]
    Task(String),
}

impl StoreError {
    /// Whether the write was refused because the entry holds another type.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, StoreError::Entry(CoreError::TypeMismatch { .. }))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
