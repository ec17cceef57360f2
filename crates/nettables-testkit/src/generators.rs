//! Proptest generators for property-based testing.
//!
//! Values stay inside the wire limits and doubles are finite, so anything
//! generated here survives an encode/decode and compares equal afterwards.

use proptest::prelude::*;

use nettables_core::{Entry, EntryFlags, EntryId, EntryType, SequenceNumber, Value};
use nettables_sync::{Message, PROTOCOL_REVISION};

/// Generate an entry type.
pub fn entry_type() -> impl Strategy<Value = EntryType> {
    prop::sample::select(EntryType::ALL.to_vec())
}

fn finite() -> impl Strategy<Value = f64> {
    -1.0e12f64..1.0e12
}

fn short_string() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.-]{0,16}"
}

/// Generate a value of the given type.
pub fn value_of(ty: EntryType) -> BoxedStrategy<Value> {
    match ty {
        EntryType::Boolean => any::<bool>().prop_map(Value::Boolean).boxed(),
        EntryType::Double => finite().prop_map(Value::Double).boxed(),
        EntryType::String => short_string().prop_map(Value::String).boxed(),
        EntryType::BooleanArray => prop::collection::vec(any::<bool>(), 0..8)
            .prop_map(Value::BooleanArray)
            .boxed(),
        EntryType::DoubleArray => prop::collection::vec(finite(), 0..8)
            .prop_map(Value::DoubleArray)
            .boxed(),
        EntryType::StringArray => prop::collection::vec(short_string(), 0..8)
            .prop_map(Value::StringArray)
            .boxed(),
    }
}

/// Generate a value of any type.
pub fn value() -> impl Strategy<Value = Value> {
    entry_type().prop_flat_map(value_of)
}

/// Generate a `/` separated entry name.
pub fn entry_name() -> impl Strategy<Value = String> {
    "(/[a-z][a-z0-9]{0,5}){1,3}"
}

/// Generate an assigned (known) entry id.
pub fn known_id() -> impl Strategy<Value = EntryId> {
    (0u16..0xFFFF).prop_map(EntryId::new)
}

/// Generate a sequence number.
pub fn sequence_number() -> impl Strategy<Value = SequenceNumber> {
    any::<u16>().prop_map(SequenceNumber::new)
}

/// Generate an entry as a server would assign it.
pub fn remote_entry() -> impl Strategy<Value = Entry> {
    (entry_name(), known_id(), sequence_number(), value(), any::<bool>()).prop_map(
        |(name, id, seq, value, persistent)| {
            let flags = if persistent {
                EntryFlags::PERSISTENT
            } else {
                EntryFlags::NONE
            };
            Entry::remote(name, id, seq, value).with_flags(flags)
        },
    )
}

/// Generate a message that can be decoded without knowing any entries.
pub fn self_describing_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::KeepAlive),
        Just(Message::ServerHelloComplete),
        any::<u16>().prop_map(|revision| Message::ClientHello { revision }),
        Just(Message::ProtocolUnsupported {
            revision: PROTOCOL_REVISION
        }),
        (entry_name(), any::<u16>(), sequence_number(), value()).prop_map(
            |(name, id, sequence_number, value)| Message::EntryAssignment {
                name,
                id: EntryId::new(id),
                sequence_number,
                value,
            }
        ),
    ]
}

/// Generate an update together with the type its entry has.
pub fn update_message() -> impl Strategy<Value = (Message, EntryType)> {
    (known_id(), sequence_number(), entry_type()).prop_flat_map(|(id, sequence_number, ty)| {
        value_of(ty).prop_map(move |value| {
            (
                Message::EntryUpdate {
                    id,
                    sequence_number,
                    value,
                },
                ty,
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use nettables_core::{validate_value, TypeManager};
    use nettables_sync::decode;

    proptest! {
        #[test]
        fn test_generated_values_fit_the_wire(value in value()) {
            prop_assert!(validate_value(&value).is_ok());
        }

        #[test]
        fn test_self_describing_messages_decode(message in self_describing_message()) {
            let mut out = BytesMut::new();
            message.encode(&mut out).unwrap();
            let decoded = decode(&out, &TypeManager::new(), &|_: EntryId| None).unwrap();
            prop_assert_eq!(decoded, Some((message, out.len())));
        }

        #[test]
        fn test_updates_decode_with_known_type((message, ty) in update_message()) {
            let mut out = BytesMut::new();
            message.encode(&mut out).unwrap();
            let decoded = decode(&out, &TypeManager::new(), &move |_: EntryId| Some(ty)).unwrap();
            prop_assert_eq!(decoded, Some((message, out.len())));
        }

        #[test]
        fn test_remote_entries_have_ids(entry in remote_entry()) {
            prop_assert!(entry.id().is_known());
            prop_assert_eq!(entry.entry_type(), entry.value().entry_type());
        }
    }
}
