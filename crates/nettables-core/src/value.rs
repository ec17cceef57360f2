//! Entry values and their wire type tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of an entry, with its wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryType {
    Boolean = 0x00,
    Double = 0x01,
    String = 0x02,
    BooleanArray = 0x10,
    DoubleArray = 0x11,
    StringArray = 0x12,
}

impl EntryType {
    /// Every type the protocol defines.
    pub const ALL: [EntryType; 6] = [
        EntryType::Boolean,
        EntryType::Double,
        EntryType::String,
        EntryType::BooleanArray,
        EntryType::DoubleArray,
        EntryType::StringArray,
    ];

    /// Wire tag byte.
    pub const fn wire_id(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag byte.
    pub fn from_wire_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.wire_id() == id)
    }

    /// Whether values of this type are arrays.
    pub const fn is_array(self) -> bool {
        matches!(
            self,
            EntryType::BooleanArray | EntryType::DoubleArray | EntryType::StringArray
        )
    }

    /// Human-readable type name.
    pub const fn name(self) -> &'static str {
        match self {
            EntryType::Boolean => "boolean",
            EntryType::Double => "double",
            EntryType::String => "string",
            EntryType::BooleanArray => "boolean[]",
            EntryType::DoubleArray => "double[]",
            EntryType::StringArray => "string[]",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed entry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Double(f64),
    String(String),
    BooleanArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl Value {
    /// The type tag of this value.
    pub fn entry_type(&self) -> EntryType {
        match self {
            Value::Boolean(_) => EntryType::Boolean,
            Value::Double(_) => EntryType::Double,
            Value::String(_) => EntryType::String,
            Value::BooleanArray(_) => EntryType::BooleanArray,
            Value::DoubleArray(_) => EntryType::DoubleArray,
            Value::StringArray(_) => EntryType::StringArray,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool_array(&self) -> Option<&[bool]> {
        match self {
            Value::BooleanArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64_array(&self) -> Option<&[f64]> {
        match self {
            Value::DoubleArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Value::StringArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BooleanArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::DoubleArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StringArray(v)
    }
}
