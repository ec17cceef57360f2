//! Error types for nodes.

use nettables_core::CoreError;
use nettables_store::StoreError;
use nettables_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while starting or running a node.
#[derive(Debug, Error)]
pub enum NtError {
    /// Entry or codec error.
    #[error("entry error: {0}")]
    Entry(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Transport setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The node was already started.
    #[error("already running")]
    AlreadyRunning,
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NtError>;
