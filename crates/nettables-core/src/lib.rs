//! # Nettables Core
//!
//! Pure primitives for nettables: named, typed, versioned table entries and
//! the value encoding shared by every node.
//!
//! This crate contains no I/O, no locking, no networking.
//!
//! ## Key Types
//!
//! - [`Entry`] - A single named, typed, versioned value
//! - [`EntryId`] - Server-assigned handle ([`EntryId::UNKNOWN`] until assigned)
//! - [`SequenceNumber`] - 16-bit wrapping version counter with circular ordering
//! - [`Value`] / [`EntryType`] - Tagged payloads and their wire type tags
//! - [`TypeManager`] - The set of value types a node accepts off the wire
//!
//! ## Encoding
//!
//! Values are encoded big-endian with length-prefixed strings and arrays.
//! See the [`codec`] module.

pub mod codec;
pub mod entry;
pub mod error;
pub mod type_manager;
pub mod types;
pub mod value;

pub use codec::{encode_string, encode_value, validate_string, validate_value, WireReader};
pub use entry::{Entry, EntryFlags};
pub use error::{CodecError, CoreError};
pub use type_manager::TypeManager;
pub use types::{EntryId, SequenceNumber};
pub use value::{EntryType, Value};
