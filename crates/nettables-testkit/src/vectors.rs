//! Golden wire vectors.
//!
//! Each vector pairs a message with the exact bytes any NetworkTables 2.0
//! peer puts on the wire for it.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use nettables_core::{EntryId, EntryType, SequenceNumber, TypeManager, Value};
use nettables_sync::{decode, Message, PROTOCOL_REVISION};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// The message.
    pub message: Message,
    /// Type the receiver already knows for the entry. Only updates need it.
    pub known_type: Option<EntryType>,
    /// Expected encoding (hex).
    pub expected_hex: &'static str,
}

/// Serializable form of a vector, for sharing with other implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedVector {
    pub name: String,
    pub message: String,
    pub hex: String,
}

fn assignment(name: &str, id: u16, seq: u16, value: Value) -> Message {
    Message::EntryAssignment {
        name: name.into(),
        id: EntryId::new(id),
        sequence_number: SequenceNumber::new(seq),
        value,
    }
}

fn update(id: u16, seq: u16, value: Value) -> Message {
    Message::EntryUpdate {
        id: EntryId::new(id),
        sequence_number: SequenceNumber::new(seq),
        value,
    }
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "keep alive",
            message: Message::KeepAlive,
            known_type: None,
            expected_hex: "00",
        },
        GoldenVector {
            name: "client hello",
            message: Message::ClientHello {
                revision: PROTOCOL_REVISION,
            },
            known_type: None,
            expected_hex: "010200",
        },
        GoldenVector {
            name: "protocol unsupported",
            message: Message::ProtocolUnsupported {
                revision: PROTOCOL_REVISION,
            },
            known_type: None,
            expected_hex: "020200",
        },
        GoldenVector {
            name: "server hello complete",
            message: Message::ServerHelloComplete,
            known_type: None,
            expected_hex: "03",
        },
        GoldenVector {
            name: "boolean assignment",
            message: assignment("a", 0, 1, Value::Boolean(true)),
            known_type: None,
            expected_hex: "10000161000000000101",
        },
        GoldenVector {
            name: "double assignment at sequence wrap",
            message: assignment("/x", 0x0102, 0xFFFF, Value::Double(1.0)),
            known_type: None,
            expected_hex: "1000022f78010102ffff3ff0000000000000",
        },
        GoldenVector {
            name: "string assignment without id",
            message: assignment("s", 0xFFFF, 0, Value::from("hi")),
            known_type: None,
            expected_hex: "1000017302ffff000000026869",
        },
        GoldenVector {
            name: "boolean array assignment",
            message: assignment("b", 3, 2, Value::BooleanArray(vec![true, false, true])),
            known_type: None,
            expected_hex: "10000162100003000203010001",
        },
        GoldenVector {
            name: "string array assignment with empty element",
            message: assignment(
                "sa",
                4,
                0,
                Value::StringArray(vec!["a".into(), String::new()]),
            ),
            known_type: None,
            expected_hex: "10000273611200040000020001610000",
        },
        GoldenVector {
            name: "double array update",
            message: update(5, 7, Value::DoubleArray(vec![1.0, -2.0])),
            known_type: Some(EntryType::DoubleArray),
            expected_hex: "1100050007023ff0000000000000c000000000000000",
        },
        GoldenVector {
            name: "boolean update",
            message: update(0, 2, Value::Boolean(false)),
            known_type: Some(EntryType::Boolean),
            expected_hex: "110000000200",
        },
    ]
}

/// Check one vector in both directions.
pub fn verify_vector(vector: &GoldenVector) -> Result<(), String> {
    let mut out = BytesMut::new();
    vector
        .message
        .encode(&mut out)
        .map_err(|e| format!("encode failed: {}", e))?;
    let actual = hex::encode(&out);
    if actual != vector.expected_hex {
        return Err(format!(
            "encoding mismatch: expected {}, got {}",
            vector.expected_hex, actual
        ));
    }

    let bytes = hex::decode(vector.expected_hex).map_err(|e| e.to_string())?;
    let known = vector.known_type;
    let decoded = decode(&bytes, &TypeManager::new(), &move |_: EntryId| known)
        .map_err(|e| format!("decode failed: {}", e))?;
    match decoded {
        Some((message, used)) if used == bytes.len() && message == vector.message => Ok(()),
        Some((message, used)) => Err(format!(
            "decoded {:?} from {} of {} bytes",
            message,
            used,
            bytes.len()
        )),
        None => Err("decoder wanted more bytes".into()),
    }
}

/// Verify all golden vectors, returning the failures.
pub fn verify_all_vectors() -> Vec<(&'static str, String)> {
    all_vectors()
        .iter()
        .filter_map(|v| verify_vector(v).err().map(|e| (v.name, e)))
        .collect()
}

/// All vectors as pretty-printed JSON.
pub fn export_json() -> serde_json::Result<String> {
    let exported: Vec<ExportedVector> = all_vectors()
        .into_iter()
        .map(|v| ExportedVector {
            name: v.name.to_owned(),
            message: format!("{:?}", v.message),
            hex: v.expected_hex.to_owned(),
        })
        .collect();
    serde_json::to_string_pretty(&exported)
}
