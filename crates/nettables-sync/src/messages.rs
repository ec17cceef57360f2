//! Wire messages.
//!
//! Every message is a type byte followed by its fields; there is no length
//! prefix, so a decoder has to know the value type of an entry before it can
//! find the end of an update.

use bytes::{BufMut, BytesMut};

use nettables_core::{
    encode_string, encode_value, CodecError, Entry, EntryId, EntryType, SequenceNumber,
    TypeManager, Value, WireReader,
};

use crate::error::{Result, SyncError};

/// Protocol revision spoken by this implementation.
pub const PROTOCOL_REVISION: u16 = 0x0200;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 1735;

/// Message type bytes.
pub mod kind {
    pub const KEEP_ALIVE: u8 = 0x00;
    pub const CLIENT_HELLO: u8 = 0x01;
    pub const PROTOCOL_UNSUPPORTED: u8 = 0x02;
    pub const SERVER_HELLO_COMPLETE: u8 = 0x03;
    pub const ENTRY_ASSIGNMENT: u8 = 0x10;
    pub const ENTRY_UPDATE: u8 = 0x11;
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    ClientHello {
        revision: u16,
    },
    /// Sent by the server before it closes a client speaking another revision.
    ProtocolUnsupported {
        revision: u16,
    },
    ServerHelloComplete,
    EntryAssignment {
        name: String,
        id: EntryId,
        sequence_number: SequenceNumber,
        value: Value,
    },
    EntryUpdate {
        id: EntryId,
        sequence_number: SequenceNumber,
        value: Value,
    },
}

impl Message {
    pub fn assignment(entry: &Entry) -> Self {
        Message::EntryAssignment {
            name: entry.name().to_owned(),
            id: entry.id(),
            sequence_number: entry.sequence_number(),
            value: entry.value().clone(),
        }
    }

    pub fn update(entry: &Entry) -> Self {
        Message::EntryUpdate {
            id: entry.id(),
            sequence_number: entry.sequence_number(),
            value: entry.value().clone(),
        }
    }

    /// Type byte on the wire.
    pub fn kind(&self) -> u8 {
        match self {
            Message::KeepAlive => kind::KEEP_ALIVE,
            Message::ClientHello { .. } => kind::CLIENT_HELLO,
            Message::ProtocolUnsupported { .. } => kind::PROTOCOL_UNSUPPORTED,
            Message::ServerHelloComplete => kind::SERVER_HELLO_COMPLETE,
            Message::EntryAssignment { .. } => kind::ENTRY_ASSIGNMENT,
            Message::EntryUpdate { .. } => kind::ENTRY_UPDATE,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep alive",
            Message::ClientHello { .. } => "client hello",
            Message::ProtocolUnsupported { .. } => "protocol unsupported",
            Message::ServerHelloComplete => "server hello complete",
            Message::EntryAssignment { .. } => "entry assignment",
            Message::EntryUpdate { .. } => "entry update",
        }
    }

    /// Append the encoded message to `out`.
    ///
    /// On error `out` may hold a partial message and should be discarded.
    pub fn encode(&self, out: &mut BytesMut) -> std::result::Result<(), CodecError> {
        out.put_u8(self.kind());
        match self {
            Message::KeepAlive | Message::ServerHelloComplete => {}
            Message::ClientHello { revision } | Message::ProtocolUnsupported { revision } => {
                out.put_u16(*revision);
            }
            Message::EntryAssignment {
                name,
                id,
                sequence_number,
                value,
            } => {
                encode_string(name, out)?;
                out.put_u8(value.entry_type().wire_id());
                out.put_u16(id.raw());
                out.put_u16(sequence_number.raw());
                encode_value(value, out)?;
            }
            Message::EntryUpdate {
                id,
                sequence_number,
                value,
            } => {
                out.put_u16(id.raw());
                out.put_u16(sequence_number.raw());
                encode_value(value, out)?;
            }
        }
        Ok(())
    }

    /// The entry an assignment describes.
    pub fn into_entry(self) -> Option<Entry> {
        match self {
            Message::EntryAssignment {
                name,
                id,
                sequence_number,
                value,
            } => Some(Entry::remote(name, id, sequence_number, value)),
            _ => None,
        }
    }
}

/// Decode one message from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only part of a message. `entry_type`
/// resolves the value type of an update from the receiver's store.
pub fn decode(
    buf: &[u8],
    types: &TypeManager,
    entry_type: &dyn Fn(EntryId) -> Option<EntryType>,
) -> Result<Option<(Message, usize)>> {
    let mut reader = WireReader::new(buf);
    match decode_from(&mut reader, types, entry_type) {
        Ok(message) => Ok(Some((message, reader.position()))),
        Err(DecodeError::Codec(e)) if e.is_incomplete() => Ok(None),
        Err(DecodeError::Codec(e)) => Err(SyncError::BadMessage(e.to_string())),
        Err(DecodeError::Bad(reason)) => Err(SyncError::BadMessage(reason)),
    }
}

enum DecodeError {
    Codec(CodecError),
    Bad(String),
}

impl From<CodecError> for DecodeError {
    fn from(e: CodecError) -> Self {
        DecodeError::Codec(e)
    }
}

fn decode_from(
    reader: &mut WireReader<'_>,
    types: &TypeManager,
    entry_type: &dyn Fn(EntryId) -> Option<EntryType>,
) -> std::result::Result<Message, DecodeError> {
    let message = match reader.read_u8()? {
        kind::KEEP_ALIVE => Message::KeepAlive,
        kind::CLIENT_HELLO => Message::ClientHello {
            revision: reader.read_u16()?,
        },
        kind::PROTOCOL_UNSUPPORTED => Message::ProtocolUnsupported {
            revision: reader.read_u16()?,
        },
        kind::SERVER_HELLO_COMPLETE => Message::ServerHelloComplete,
        kind::ENTRY_ASSIGNMENT => {
            let name = reader.read_string()?;
            let ty = types.type_for_wire_id(reader.read_u8()?)?;
            let id = EntryId::new(reader.read_u16()?);
            let sequence_number = SequenceNumber::new(reader.read_u16()?);
            let value = types.read_value(ty, reader)?;
            Message::EntryAssignment {
                name,
                id,
                sequence_number,
                value,
            }
        }
        kind::ENTRY_UPDATE => {
            let id = EntryId::new(reader.read_u16()?);
            let sequence_number = SequenceNumber::new(reader.read_u16()?);
            let ty = entry_type(id)
                .ok_or_else(|| DecodeError::Bad(format!("update for unknown entry id {}", id)))?;
            let value = types.read_value(ty, reader)?;
            Message::EntryUpdate {
                id,
                sequence_number,
                value,
            }
        }
        other => return Err(DecodeError::Bad(format!("unknown message type {:#04x}", other))),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_entries(_: EntryId) -> Option<EntryType> {
        None
    }

    fn encoded(message: &Message) -> Vec<u8> {
        let mut out = BytesMut::new();
        message.encode(&mut out).unwrap();
        out.to_vec()
    }

    #[test]
    fn test_client_hello_bytes() {
        let bytes = encoded(&Message::ClientHello {
            revision: PROTOCOL_REVISION,
        });
        assert_eq!(bytes, vec![0x01, 0x02, 0x00]);
    }

    #[test]
    fn test_assignment_bytes() {
        let message = Message::EntryAssignment {
            name: "a".into(),
            id: EntryId::new(1),
            sequence_number: SequenceNumber::new(2),
            value: Value::Boolean(true),
        };
        assert_eq!(
            encoded(&message),
            vec![0x10, 0x00, 0x01, b'a', 0x00, 0x00, 0x01, 0x00, 0x02, 0x01]
        );
    }

    #[test]
    fn test_decode_assignment() {
        let message = Message::EntryAssignment {
            name: "/drive/speed".into(),
            id: EntryId::UNKNOWN,
            sequence_number: SequenceNumber::ZERO,
            value: Value::Double(1.25),
        };
        let bytes = encoded(&message);
        let (decoded, used) = decode(&bytes, &TypeManager::new(), &no_entries)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, message);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_decode_update_uses_store_type() {
        let message = Message::EntryUpdate {
            id: EntryId::new(4),
            sequence_number: SequenceNumber::new(9),
            value: Value::from(vec!["x".to_string()]),
        };
        let bytes = encoded(&message);
        let lookup = |id: EntryId| (id == EntryId::new(4)).then_some(EntryType::StringArray);
        let (decoded, _) = decode(&bytes, &TypeManager::new(), &lookup).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_update_for_unknown_id_is_bad() {
        let bytes = encoded(&Message::EntryUpdate {
            id: EntryId::new(4),
            sequence_number: SequenceNumber::new(9),
            value: Value::Boolean(false),
        });
        let err = decode(&bytes, &TypeManager::new(), &no_entries).unwrap_err();
        assert!(matches!(err, SyncError::BadMessage(_)));
    }

    #[test]
    fn test_decode_partial_returns_none() {
        let bytes = encoded(&Message::EntryAssignment {
            name: "speed".into(),
            id: EntryId::new(1),
            sequence_number: SequenceNumber::new(1),
            value: Value::Double(2.0),
        });
        for cut in 0..bytes.len() {
            let result = decode(&bytes[..cut], &TypeManager::new(), &no_entries).unwrap();
            assert!(result.is_none(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_decode_two_messages_in_one_buffer() {
        let mut out = BytesMut::new();
        Message::KeepAlive.encode(&mut out).unwrap();
        Message::ServerHelloComplete.encode(&mut out).unwrap();

        let (first, used) = decode(&out, &TypeManager::new(), &no_entries).unwrap().unwrap();
        assert_eq!(first, Message::KeepAlive);
        let (second, _) = decode(&out[used..], &TypeManager::new(), &no_entries)
            .unwrap()
            .unwrap();
        assert_eq!(second, Message::ServerHelloComplete);
    }

    #[test]
    fn test_unknown_message_type_is_bad() {
        let err = decode(&[0x42], &TypeManager::new(), &no_entries).unwrap_err();
        assert!(matches!(err, SyncError::BadMessage(_)));
    }

    #[test]
    fn test_unaccepted_value_type_is_bad() {
        let bytes = encoded(&Message::EntryAssignment {
            name: "s".into(),
            id: EntryId::new(1),
            sequence_number: SequenceNumber::new(1),
            value: Value::from("text"),
        });
        let types = TypeManager::with_types(&[EntryType::Double]);
        let err = decode(&bytes, &types, &no_entries).unwrap_err();
        assert!(matches!(err, SyncError::BadMessage(_)));
    }

    #[test]
    fn test_into_entry() {
        let entry = Message::EntryAssignment {
            name: "x".into(),
            id: EntryId::new(3),
            sequence_number: SequenceNumber::new(7),
            value: Value::Double(1.0),
        }
        .into_entry()
        .unwrap();
        assert_eq!(entry.id(), EntryId::new(3));
        assert_eq!(entry.sequence_number(), SequenceNumber::new(7));
        assert!(Message::KeepAlive.into_entry().is_none());
    }
}
