//! Seams between the store and the layers around it.
//!
//! The store never talks to a socket. Changes leave it through the two
//! receiver hooks, handshake snapshots through an [`EntrySink`], and the table
//! API reaches it through the object-safe [`TableBackend`].

use std::io;

use async_trait::async_trait;
use nettables_core::{Entry, EntryFlags, Value};

use crate::error::Result;
use crate::listener::{EntryListener, ListenerHandle};

/// Hook for changes made locally that must reach the peer.
///
/// Called after the store lock is released, once per accepted change.
pub trait OutgoingReceiver: Send + Sync {
    /// A new entry was created locally.
    fn offer_outgoing_assignment(&self, entry: &Entry);

    /// An existing entry was written locally.
    fn offer_outgoing_update(&self, entry: &Entry);
}

/// Hook for changes received from a peer and applied to the store.
pub trait IncomingReceiver: Send + Sync {
    fn offer_incoming_assignment(&self, entry: &Entry);

    fn offer_incoming_update(&self, entry: &Entry);
}

/// Receiver that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReceiver;

impl OutgoingReceiver for NullReceiver {
    fn offer_outgoing_assignment(&self, _entry: &Entry) {}

    fn offer_outgoing_update(&self, _entry: &Entry) {}
}

impl IncomingReceiver for NullReceiver {
    fn offer_incoming_assignment(&self, _entry: &Entry) {}

    fn offer_incoming_update(&self, _entry: &Entry) {}
}

/// Source of the freshest copy of an entry for the writer.
pub trait EntrySource: Send + Sync {
    /// Clone the named entry and mark the stored one clean.
    fn checkout(&self, name: &str) -> Option<Entry>;
}

/// Destination for entry messages, typically a live connection.
#[async_trait]
pub trait EntrySink: Send + Sync {
    /// Write an entry assignment.
    async fn send_entry_assignment(&self, entry: &Entry) -> io::Result<()>;

    /// Write an entry update.
    async fn send_entry_update(&self, entry: &Entry) -> io::Result<()>;

    /// Push buffered messages to the peer.
    async fn flush(&self) -> io::Result<()>;
}

/// The key/value surface the table API is built on.
///
/// Implemented by both client and server stores so a table can be handed
/// either without knowing which role it talks to.
pub trait TableBackend: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Values
    // ─────────────────────────────────────────────────────────────────────────

    /// Current value of an entry.
    fn value(&self, name: &str) -> Option<Value>;

    /// Local write. Fails on a type conflict or a value the wire can't carry.
    fn put_value(&self, name: &str, value: Value) -> Result<()>;

    /// All entry names, sorted.
    fn keys(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool;

    // ─────────────────────────────────────────────────────────────────────────
    // Flags
    // ─────────────────────────────────────────────────────────────────────────

    fn flags(&self, name: &str) -> Option<EntryFlags>;

    /// Replace an entry's flags. Returns `false` if the entry doesn't exist.
    fn set_flags(&self, name: &str, flags: EntryFlags) -> bool;

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a listener for entries whose name starts with `prefix`.
    ///
    /// With `immediate`, the listener is called for every matching entry
    /// before this returns.
    fn add_entry_listener(
        &self,
        prefix: &str,
        immediate: bool,
        listener: EntryListener,
    ) -> ListenerHandle;

    fn remove_entry_listener(&self, handle: ListenerHandle) -> bool;
}
