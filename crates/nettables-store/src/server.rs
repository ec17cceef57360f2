//! Server-side merge rules.
//!
//! The server is the id authority: it numbers entries as they appear, refuses
//! a second assignment for a name it already holds and orders updates by
//! sequence number.

use std::io;

use tracing::warn;

use nettables_core::{Entry, EntryId, SequenceNumber, Value};

use crate::store::{EntryStore, EntryTables, StoreRole};
use crate::traits::EntrySink;

/// Merge rules for the server role.
#[derive(Debug, Default, Clone)]
pub struct ServerRole {
    next_id: u16,
}

/// The entry table of a server node.
pub type ServerEntryStore = EntryStore<ServerRole>;

impl ServerRole {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> EntryId {
        let id = EntryId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == EntryId::UNKNOWN.raw() {
            self.next_id = 0;
        }
        id
    }
}

impl StoreRole for ServerRole {
    fn add_entry(&mut self, tables: &mut EntryTables, mut entry: Entry) -> bool {
        if tables.contains(entry.name()) {
            return false;
        }
        entry.set_id(self.allocate_id());
        tables.insert(entry);
        true
    }

    fn update_entry(
        &mut self,
        entry: &mut Entry,
        sequence_number: SequenceNumber,
        value: Value,
    ) -> bool {
        match entry.put_value(sequence_number, value) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(error = %e, "ignoring update");
                false
            }
        }
    }
}

impl EntryStore<ServerRole> {
    /// A server store with ids starting at zero.
    pub fn server() -> Self {
        Self::new(ServerRole::new())
    }

    /// Write an assignment for every entry, without flushing.
    ///
    /// Used for the handshake snapshot; the caller follows it with the
    /// hello-complete message and flushes both together.
    pub async fn send_all_entries(&self, sink: &dyn EntrySink) -> io::Result<usize> {
        let entries = self.snapshot();
        for entry in &entries {
            sink.send_entry_assignment(entry).await?;
        }
        Ok(entries.len())
    }
}
