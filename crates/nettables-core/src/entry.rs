//! Entry: a single named, typed, versioned value.
//!
//! The name is the immutable key. The id is assigned by the server and is
//! [`EntryId::UNKNOWN`] for entries no peer has acknowledged yet. The type is
//! fixed by the first value except on the unconditional [`Entry::force_put`]
//! path used when a remote assignment supersedes local state.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{EntryId, SequenceNumber};
use crate::value::{EntryType, Value};

/// Entry flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntryFlags(u8);

impl EntryFlags {
    pub const NONE: Self = Self(0);
    /// Saved by the server and restored on restart.
    pub const PERSISTENT: Self = Self(0x01);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: EntryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EntryFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EntryFlags) {
        self.0 &= !other.0;
    }
}

/// A named, typed, versioned value.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    name: String,
    id: EntryId,
    sequence_number: SequenceNumber,
    value: Value,
    flags: EntryFlags,
    dirty: bool,
}

impl Entry {
    /// Create a local entry not yet known to any peer.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            id: EntryId::UNKNOWN,
            sequence_number: SequenceNumber::ZERO,
            value,
            flags: EntryFlags::NONE,
            dirty: false,
        }
    }

    /// Create an entry as described by a remote assignment.
    pub fn remote(
        name: impl Into<String>,
        id: EntryId,
        sequence_number: SequenceNumber,
        value: Value,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            sequence_number,
            value,
            flags: EntryFlags::NONE,
            dirty: false,
        }
    }

    /// Builder-style flag setter.
    pub fn with_flags(mut self, flags: EntryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn entry_type(&self) -> EntryType {
        self.value.entry_type()
    }

    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.contains(EntryFlags::PERSISTENT)
    }

    pub fn set_flags(&mut self, flags: EntryFlags) {
        self.flags = flags;
    }

    pub fn set_id(&mut self, id: EntryId) {
        self.id = id;
    }

    /// Forget the server-assigned id.
    pub fn clear_id(&mut self) {
        self.id = EntryId::UNKNOWN;
    }

    /// Unconditional overwrite of sequence number, type and value.
    pub fn force_put(&mut self, sequence_number: SequenceNumber, value: Value) {
        self.sequence_number = sequence_number;
        self.value = value;
    }

    /// Unconditional overwrite of sequence number and value of the same type.
    pub fn force_put_value(
        &mut self,
        sequence_number: SequenceNumber,
        value: Value,
    ) -> Result<(), CoreError> {
        self.check_type(&value)?;
        self.force_put(sequence_number, value);
        Ok(())
    }

    /// Apply a versioned update if it is newer than what we hold.
    ///
    /// Returns `Ok(false)` for stale or duplicate sequence numbers.
    pub fn put_value(
        &mut self,
        sequence_number: SequenceNumber,
        value: Value,
    ) -> Result<bool, CoreError> {
        self.check_type(&value)?;
        if !sequence_number.is_after(self.sequence_number) {
            return Ok(false);
        }
        self.sequence_number = sequence_number;
        self.value = value;
        Ok(true)
    }

    /// Local write: bumps the sequence number and marks the entry dirty.
    pub fn set_value(&mut self, value: Value) -> Result<(), CoreError> {
        self.check_type(&value)?;
        self.sequence_number = self.sequence_number.next();
        self.value = value;
        self.dirty = true;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn check_type(&self, value: &Value) -> Result<(), CoreError> {
        let existing = self.entry_type();
        let attempted = value.entry_type();
        if existing != attempted {
            return Err(CoreError::TypeMismatch {
                name: self.name.clone(),
                existing,
                attempted,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed(seq: u16, value: f64) -> Entry {
        Entry::remote("speed", EntryId::new(5), SequenceNumber::new(seq), Value::Double(value))
    }

    #[test]
    fn test_new_entry_is_unknown() {
        let entry = Entry::new("speed", Value::Double(1.0));
        assert_eq!(entry.id(), EntryId::UNKNOWN);
        assert_eq!(entry.sequence_number(), SequenceNumber::ZERO);
        assert_eq!(entry.entry_type(), EntryType::Double);
        assert!(!entry.is_dirty());
    }

    #[test]
    fn test_put_value_applies_newer() {
        let mut entry = speed(5, 1.0);
        assert!(entry.put_value(SequenceNumber::new(6), Value::Double(2.0)).unwrap());
        assert_eq!(entry.value(), &Value::Double(2.0));
        assert_eq!(entry.sequence_number(), SequenceNumber::new(6));
    }

    #[test]
    fn test_put_value_drops_stale_and_duplicate() {
        let mut entry = speed(5, 1.0);
        assert!(!entry.put_value(SequenceNumber::new(2), Value::Double(9.0)).unwrap());
        assert!(!entry.put_value(SequenceNumber::new(5), Value::Double(9.0)).unwrap());
        assert_eq!(entry.value(), &Value::Double(1.0));
        assert_eq!(entry.sequence_number(), SequenceNumber::new(5));
    }

    #[test]
    fn test_put_value_across_wrap() {
        let mut entry = speed(0xFFFF, 1.0);
        assert!(entry.put_value(SequenceNumber::new(0), Value::Double(2.0)).unwrap());
        assert_eq!(entry.sequence_number(), SequenceNumber::new(0));
    }

    #[test]
    fn test_put_value_rejects_type_change() {
        let mut entry = speed(5, 1.0);
        let err = entry
            .put_value(SequenceNumber::new(6), Value::Boolean(true))
            .unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        assert_eq!(entry.value(), &Value::Double(1.0));
    }

    #[test]
    fn test_force_put_ignores_order_and_type() {
        let mut entry = speed(5, 1.0);
        entry.force_put(SequenceNumber::new(1), Value::from("now a string"));
        assert_eq!(entry.entry_type(), EntryType::String);
        assert_eq!(entry.sequence_number(), SequenceNumber::new(1));
    }

    #[test]
    fn test_force_put_value_keeps_type() {
        let mut entry = speed(5, 1.0);
        entry
            .force_put_value(SequenceNumber::new(2), Value::Double(3.0))
            .unwrap();
        assert_eq!(entry.sequence_number(), SequenceNumber::new(2));
        assert!(entry
            .force_put_value(SequenceNumber::new(3), Value::Boolean(false))
            .is_err());
    }

    #[test]
    fn test_set_value_bumps_and_dirties() {
        let mut entry = Entry::new("speed", Value::Double(1.0));
        entry.set_value(Value::Double(2.0)).unwrap();
        assert_eq!(entry.sequence_number(), SequenceNumber::new(1));
        assert!(entry.is_dirty());
        entry.mark_clean();
        assert!(!entry.is_dirty());
    }

    #[test]
    fn test_flags() {
        let mut flags = EntryFlags::NONE;
        assert!(!flags.contains(EntryFlags::PERSISTENT));
        flags.insert(EntryFlags::PERSISTENT);
        assert!(flags.contains(EntryFlags::PERSISTENT));
        flags.remove(EntryFlags::PERSISTENT);
        assert_eq!(flags, EntryFlags::NONE);

        let entry = Entry::new("x", Value::Boolean(true)).with_flags(EntryFlags::PERSISTENT);
        assert!(entry.is_persistent());
    }

    #[test]
    fn test_clear_id() {
        let mut entry = speed(1, 1.0);
        entry.clear_id();
        assert!(!entry.id().is_known());
    }
}
