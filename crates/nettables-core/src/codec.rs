//! Value encoding for the wire.
//!
//! Layout:
//! - integers and doubles are big-endian
//! - strings are a `u16` byte length followed by UTF-8
//! - arrays are a `u8` element count followed by the elements
//!
//! Decoding works over a borrowed buffer that may hold a partial frame; running
//! out of bytes yields [`CodecError::Incomplete`] so the caller can read more
//! and retry from the start of the frame.

use bytes::{BufMut, BytesMut};

use crate::error::CodecError;
use crate::value::{EntryType, Value};

/// Longest string the wire can carry.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Most elements an array can carry.
pub const MAX_ARRAY_LEN: usize = u8::MAX as usize;

/// Append a length-prefixed UTF-8 string.
pub fn encode_string(s: &str, out: &mut BytesMut) -> Result<(), CodecError> {
    validate_string(s)?;
    let bytes = s.as_bytes();
    out.put_u16(bytes.len() as u16);
    out.put_slice(bytes);
    Ok(())
}

fn array_len(len: usize) -> Result<u8, CodecError> {
    if len > MAX_ARRAY_LEN {
        return Err(CodecError::TooLong { what: "array", len });
    }
    Ok(len as u8)
}

/// Append a value (without its type tag).
pub fn encode_value(value: &Value, out: &mut BytesMut) -> Result<(), CodecError> {
    match value {
        Value::Boolean(v) => out.put_u8(u8::from(*v)),
        Value::Double(v) => out.put_f64(*v),
        Value::String(v) => encode_string(v, out)?,
        Value::BooleanArray(items) => {
            out.put_u8(array_len(items.len())?);
            for v in items {
                out.put_u8(u8::from(*v));
            }
        }
        Value::DoubleArray(items) => {
            out.put_u8(array_len(items.len())?);
            for v in items {
                out.put_f64(*v);
            }
        }
        Value::StringArray(items) => {
            out.put_u8(array_len(items.len())?);
            for v in items {
                encode_string(v, out)?;
            }
        }
    }
    Ok(())
}

/// Check that a string fits the wire's length prefix.
pub fn validate_string(s: &str) -> Result<(), CodecError> {
    if s.len() > MAX_STRING_LEN {
        return Err(CodecError::TooLong {
            what: "string",
            len: s.len(),
        });
    }
    Ok(())
}

/// Check that a value fits the wire limits without encoding it.
pub fn validate_value(value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Boolean(_) | Value::Double(_) => Ok(()),
        Value::String(s) => validate_string(s),
        Value::BooleanArray(items) => array_len(items.len()).map(|_| ()),
        Value::DoubleArray(items) => array_len(items.len()).map(|_| ()),
        Value::StringArray(items) => {
            array_len(items.len())?;
            items.iter().try_for_each(|s| validate_string(s))
        }
    }
}

/// Cursor over a possibly incomplete frame.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(f64::from_be_bytes(raw))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    /// Read a value whose type is already known.
    pub fn read_value(&mut self, ty: EntryType) -> Result<Value, CodecError> {
        let value = match ty {
            EntryType::Boolean => Value::Boolean(self.read_bool()?),
            EntryType::Double => Value::Double(self.read_f64()?),
            EntryType::String => Value::String(self.read_string()?),
            EntryType::BooleanArray => {
                let count = self.read_u8()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.read_bool()?);
                }
                Value::BooleanArray(items)
            }
            EntryType::DoubleArray => {
                let count = self.read_u8()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.read_f64()?);
                }
                Value::DoubleArray(items)
            }
            EntryType::StringArray => {
                let count = self.read_u8()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.read_string()?);
                }
                Value::StringArray(items)
            }
        };
        Ok(value)
    }
}
