//! Convergence checks between two tables.
//!
//! Two nodes have converged when they hold the same names with the same types
//! and values. Ids and sequence numbers are per-session bookkeeping and are
//! left out of the digest.

use bytes::BytesMut;

use nettables_core::{encode_value, Entry};

const DIGEST_DOMAIN: &[u8] = b"nettables-table-v0:";

/// Deterministic digest of a table's contents.
///
/// Entries are hashed in name order as `name || type || value`, each using its
/// wire encoding, so the result does not depend on iteration order.
pub fn table_digest(entries: &[Entry]) -> blake3::Hash {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name().cmp(b.name()));

    let mut hasher = blake3::Hasher::new();
    hasher.update(DIGEST_DOMAIN);
    let mut buf = BytesMut::new();
    for entry in sorted {
        buf.clear();
        hasher.update(&(entry.name().len() as u64).to_be_bytes());
        hasher.update(entry.name().as_bytes());
        hasher.update(&[entry.entry_type().wire_id()]);
        if encode_value(entry.value(), &mut buf).is_err() {
            // Values that can't go on the wire still need to affect the digest.
            buf.clear();
            buf.extend_from_slice(format!("{:?}", entry.value()).as_bytes());
        }
        hasher.update(&(buf.len() as u64).to_be_bytes());
        hasher.update(&buf);
    }
    hasher.finalize()
}

/// Outcome of comparing two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Same names, types and values.
    Converged,
    /// A name is present on one side only.
    Missing { name: String, local: bool },
    /// A name is present on both sides with different contents.
    Diverged { name: String },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare two tables and report the first difference, in name order.
pub fn verify_convergence(local: &[Entry], remote: &[Entry]) -> ConvergenceResult {
    if table_digest(local) == table_digest(remote) {
        return ConvergenceResult::Converged;
    }

    let mut local: Vec<&Entry> = local.iter().collect();
    let mut remote: Vec<&Entry> = remote.iter().collect();
    local.sort_by(|a, b| a.name().cmp(b.name()));
    remote.sort_by(|a, b| a.name().cmp(b.name()));

    let (mut l, mut r) = (local.iter().peekable(), remote.iter().peekable());
    loop {
        match (l.peek(), r.peek()) {
            (None, None) => return ConvergenceResult::Converged,
            (Some(a), None) => {
                return ConvergenceResult::Missing {
                    name: a.name().to_owned(),
                    local: true,
                }
            }
            (None, Some(b)) => {
                return ConvergenceResult::Missing {
                    name: b.name().to_owned(),
                    local: false,
                }
            }
            (Some(a), Some(b)) => match a.name().cmp(b.name()) {
                std::cmp::Ordering::Less => {
                    return ConvergenceResult::Missing {
                        name: a.name().to_owned(),
                        local: true,
                    }
                }
                std::cmp::Ordering::Greater => {
                    return ConvergenceResult::Missing {
                        name: b.name().to_owned(),
                        local: false,
                    }
                }
                std::cmp::Ordering::Equal => {
                    if a.value() != b.value() {
                        return ConvergenceResult::Diverged {
                            name: a.name().to_owned(),
                        };
                    }
                    l.next();
                    r.next();
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettables_core::{EntryId, SequenceNumber, Value};
    use proptest::prelude::*;

    fn entry(name: &str, id: u16, value: Value) -> Entry {
        Entry::remote(name, EntryId::new(id), SequenceNumber::new(id), value)
    }

    #[test]
    fn test_digest_ignores_order_and_ids() {
        let a = vec![
            entry("x", 1, Value::Double(1.0)),
            entry("y", 2, Value::from("hi")),
        ];
        let b = vec![
            entry("y", 7, Value::from("hi")),
            entry("x", 9, Value::Double(1.0)),
        ];
        assert_eq!(table_digest(&a), table_digest(&b));
        assert!(verify_convergence(&a, &b).is_converged());
    }

    #[test]
    fn test_value_difference_detected() {
        let a = vec![entry("x", 1, Value::Double(1.0))];
        let b = vec![entry("x", 1, Value::Double(2.0))];
        assert_eq!(
            verify_convergence(&a, &b),
            ConvergenceResult::Diverged { name: "x".into() }
        );
    }

    #[test]
    fn test_type_difference_detected() {
        let a = vec![entry("x", 1, Value::Boolean(false))];
        let b = vec![entry("x", 1, Value::BooleanArray(vec![]))];
        assert_ne!(table_digest(&a), table_digest(&b));
        assert!(!verify_convergence(&a, &b).is_converged());
    }

    #[test]
    fn test_missing_entry_detected() {
        let a = vec![entry("x", 1, Value::Double(1.0))];
        let b = vec![
            entry("x", 1, Value::Double(1.0)),
            entry("z", 2, Value::Double(1.0)),
        ];
        assert_eq!(
            verify_convergence(&a, &b),
            ConvergenceResult::Missing {
                name: "z".into(),
                local: false
            }
        );
    }

    #[test]
    fn test_name_boundaries_matter() {
        let a = vec![entry("ab", 1, Value::from("c"))];
        let b = vec![entry("a", 1, Value::from("bc"))];
        assert_ne!(table_digest(&a), table_digest(&b));
    }

    proptest! {
        #[test]
        fn test_digest_is_permutation_invariant(values in proptest::collection::vec(any::<f64>(), 1..16)) {
            let entries: Vec<Entry> = values
                .iter()
                .enumerate()
                .map(|(i, v)| entry(&format!("e{}", i), i as u16, Value::Double(*v)))
                .collect();
            let mut reversed = entries.clone();
            reversed.reverse();
            prop_assert_eq!(table_digest(&entries), table_digest(&reversed));
        }
    }
}
