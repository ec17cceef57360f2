//! # nettables testkit
//!
//! Testing utilities for nettables.
//!
//! ## Overview
//!
//! - **Golden vectors**: exact wire bytes for every message kind
//! - **Generators**: proptest strategies for values, entries and messages
//! - **Fixtures**: recording sinks, an entry builder and in-process clusters
//!
//! ## Golden Vectors
//!
//! ```rust
//! use nettables_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use nettables_testkit::generators::remote_entry;
//!
//! proptest! {
//!     #[test]
//!     fn assignment_wins(entry in remote_entry()) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    eventually, two_client_fixture, wait_for, EntryBuilder, MemoryCluster, Recorded,
    RecordingSink, TimedOut,
};
pub use generators::{remote_entry, self_describing_message, update_message, value, value_of};
pub use vectors::{all_vectors, export_json, verify_all_vectors, verify_vector, GoldenVector};
