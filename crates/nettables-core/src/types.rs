//! Strong type definitions for entry handles and versions.
//!
//! Both are 16-bit on the wire; newtypes keep them from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A server-assigned entry handle.
///
/// Entries created locally carry [`EntryId::UNKNOWN`] until the server
/// answers with an assignment naming the real id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u16);

impl EntryId {
    /// Sentinel for "not yet assigned by the server".
    pub const UNKNOWN: Self = Self(0xFFFF);

    /// Create from the raw wire value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Get the raw wire value.
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Whether the server has assigned this id.
    pub const fn is_known(&self) -> bool {
        self.0 != Self::UNKNOWN.0
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "EntryId({})", self.0)
        } else {
            write!(f, "EntryId(UNKNOWN)")
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "unknown")
        }
    }
}

impl From<u16> for EntryId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// Per-entry version counter.
///
/// Wraps at 16 bits. Ordering is circular: `a` is after `b` when the forward
/// distance from `b` to `a` is non-zero and less than half the number space.
/// Circular order is not transitive, so there is no `Ord` impl.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequenceNumber(pub u16);

impl SequenceNumber {
    /// Half of the 16-bit number space.
    pub const HALF: u16 = 0x8000;

    /// Starting sequence number of a freshly created entry.
    pub const ZERO: Self = Self(0);

    /// Create from the raw wire value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Get the raw wire value.
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// The next sequence number, wrapping past `u16::MAX`.
    pub const fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Whether `self` comes after `other` in circular order.
    ///
    /// Equal numbers are never after each other, and neither is a pair
    /// exactly half the space apart.
    pub const fn is_after(&self, other: SequenceNumber) -> bool {
        let distance = self.0.wrapping_sub(other.0);
        distance != 0 && distance < Self::HALF
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SequenceNumber {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}
