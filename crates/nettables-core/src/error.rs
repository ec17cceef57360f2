//! Error types for the nettables core.

use thiserror::Error;

use crate::value::EntryType;

/// Errors raised by entry operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("entry '{name}' already exists with type {existing}, cannot store {attempted}")]
    TypeMismatch {
        name: String,
        existing: EntryType,
        attempted: EntryType,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Not enough bytes buffered to finish decoding. Not a protocol fault.
    #[error("incomplete input")]
    Incomplete,

    #[error("unknown value type 0x{0:02x}")]
    UnknownType(u8),

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("{what} too long for the wire: {len}")]
    TooLong { what: &'static str, len: usize },
}

impl CodecError {
    /// Whether this error only means "wait for more bytes".
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete)
    }
}
