//! Registry of the value types a node accepts off the wire.
//!
//! The protocol core treats this as an opaque codec: the decoder asks it for
//! the [`EntryType`] behind a tag byte and to read the matching value.

use std::collections::HashSet;

use crate::codec::WireReader;
use crate::error::CodecError;
use crate::value::{EntryType, Value};

/// The set of types a node understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeManager {
    accepted: HashSet<EntryType>,
}

impl TypeManager {
    /// A manager accepting every protocol type.
    pub fn new() -> Self {
        Self {
            accepted: EntryType::ALL.into_iter().collect(),
        }
    }

    /// A manager accepting only the given types.
    pub fn with_types(types: &[EntryType]) -> Self {
        Self {
            accepted: types.iter().copied().collect(),
        }
    }

    pub fn accepts(&self, ty: EntryType) -> bool {
        self.accepted.contains(&ty)
    }

    /// Resolve a wire tag to a type this node accepts.
    pub fn type_for_wire_id(&self, id: u8) -> Result<EntryType, CodecError> {
        EntryType::from_wire_id(id)
            .filter(|ty| self.accepts(*ty))
            .ok_or(CodecError::UnknownType(id))
    }

    /// Read a value of a type this node accepts.
    pub fn read_value(&self, ty: EntryType, reader: &mut WireReader<'_>) -> Result<Value, CodecError> {
        if !self.accepts(ty) {
            return Err(CodecError::UnknownType(ty.wire_id()));
        }
        reader.read_value(ty)
    }
}

impl Default for TypeManager {
    fn default() -> Self {
        Self::new()
    }
}
