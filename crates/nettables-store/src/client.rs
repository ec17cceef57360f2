//! Client-side merge rules.
//!
//! A client never invents ids. It registers local entries under
//! [`EntryId::UNKNOWN`] and lets any assignment from the server win over
//! whatever it holds for that name.

use std::io;

use tracing::{debug, warn};

use nettables_core::{Entry, SequenceNumber, Value};

use crate::store::{EntryStore, EntryTables, StoreRole};
use crate::traits::EntrySink;

/// Merge rules for the client role.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientRole;

/// The entry table of a client node.
pub type ClientEntryStore = EntryStore<ClientRole>;

impl StoreRole for ClientRole {
    /// Always succeeds.
    ///
    /// An existing entry of the same name is re-keyed to the incoming id and
    /// overwritten unconditionally, type included.
    fn add_entry(&mut self, tables: &mut EntryTables, entry: Entry) -> bool {
        let name = entry.name().to_owned();
        let Some(existing) = tables.get(&name) else {
            tables.insert(entry);
            return true;
        };

        if existing.id() != entry.id() {
            debug!(name = %name, from = %existing.id(), to = %entry.id(), "re-keying entry");
            tables.map_id(&name, entry.id());
        }
        if let Some(existing) = tables.get_mut(&name) {
            existing.force_put(entry.sequence_number(), entry.value().clone());
        }
        true
    }

    /// Trusts the server's sequence number.
    ///
    /// Returns `false` while the entry has no id, or when the value's type
    /// doesn't match the entry.
    fn update_entry(
        &mut self,
        entry: &mut Entry,
        sequence_number: SequenceNumber,
        value: Value,
    ) -> bool {
        if !entry.id().is_known() {
            return false;
        }
        if let Err(e) = entry.force_put_value(sequence_number, value) {
            warn!(error = %e, "ignoring update");
            return false;
        }
        true
    }
}

impl EntryStore<ClientRole> {
    pub fn client() -> Self {
        Self::new(ClientRole)
    }

    /// Propose every entry the server hasn't acknowledged, then flush once.
    ///
    /// Returns how many assignments were written. The store lock is not held
    /// while writing.
    pub async fn send_unknown_entries(&self, sink: &dyn EntrySink) -> io::Result<usize> {
        let unknown: Vec<Entry> = self
            .snapshot()
            .into_iter()
            .filter(|e| !e.id().is_known())
            .collect();
        for entry in &unknown {
            sink.send_entry_assignment(entry).await?;
        }
        sink.flush().await?;
        debug!(count = unknown.len(), "offered unknown entries");
        Ok(unknown.len())
    }
}
