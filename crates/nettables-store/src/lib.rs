//! # Nettables Store
//!
//! The in-memory authoritative table of entries for one node, plus the
//! optional SQLite store for persistent entries.
//!
//! ## Overview
//!
//! [`EntryStore`] keeps two indexes under a single lock: entries by name
//! (authoritative, survives reconnects) and entries by server-assigned id
//! (cleared on disconnect). How remote assignments and updates merge into
//! those indexes depends on the node's role:
//!
//! - [`ClientRole`] - remote assignments always win over local state
//! - [`ServerRole`] - assigns ids, refuses duplicate names, orders updates
//!
//! ## Key Types
//!
//! - [`EntryStore`] / [`ClientEntryStore`] / [`ServerEntryStore`]
//! - [`OutgoingReceiver`] / [`IncomingReceiver`] - change hooks drained by the writer
//! - [`EntrySink`] - where handshake snapshots are written
//! - [`ListenerManager`] - synchronous observer callbacks
//! - [`PersistentStore`] - SQLite-backed persistent entries
//!
//! ## Design Notes
//!
//! - **Single linearization point**: every read and write of the two indexes
//!   goes through one `parking_lot::Mutex`.
//! - **Callbacks outside the lock**: listeners and receivers run after the
//!   lock is released, so they may read the store.
//! - **No I/O under the lock**: handshake helpers snapshot under the lock and
//!   write to the sink afterwards.

pub mod client;
pub mod error;
pub mod listener;
pub mod migration;
pub mod persistence;
pub mod server;
pub mod store;
pub mod traits;

pub use client::{ClientEntryStore, ClientRole};
pub use error::{Result, StoreError};
pub use listener::{
    ConnectionEvent, EntryListener, EntryNotification, ListenerHandle, ListenerManager,
    NotifyFlags,
};
pub use persistence::PersistentStore;
pub use server::{ServerEntryStore, ServerRole};
pub use store::{EntryStore, EntryTables, StoreRole, UpdateOutcome};
pub use traits::{
    EntrySink, EntrySource, IncomingReceiver, NullReceiver, OutgoingReceiver, TableBackend,
};
