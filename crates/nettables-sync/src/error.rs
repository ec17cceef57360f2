//! Error types for the sync module.

use std::io;

use thiserror::Error;

use nettables_core::CodecError;
use nettables_store::StoreError;

/// Errors that can occur on a connection.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure. Recovered by reconnecting.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or out-of-state message. Fatal to the connection.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// The server refused our protocol revision. Not retried.
    #[error("protocol revision {local:#06x} unsupported, server speaks {server:#06x}")]
    ProtocolUnsupported { local: u16, server: u16 },

    /// A message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether this is a transport failure, the only kind retried automatically.
    pub fn is_io(&self) -> bool {
        matches!(self, SyncError::Io(_))
    }

    pub(crate) fn closed() -> Self {
        SyncError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
