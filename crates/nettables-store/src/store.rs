//! The role-parameterised entry store.
//!
//! [`EntryStore`] owns both indexes behind one lock and applies local writes
//! and remote messages. What an assignment or update *means* is decided by the
//! [`StoreRole`]; everything else (notification, forwarding, persistence
//! tracking) is shared by both roles.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use nettables_core::{
    validate_string, validate_value, CoreError, Entry, EntryFlags, EntryId, EntryType,
    SequenceNumber, Value,
};

use crate::error::Result;
use crate::listener::{EntryListener, EntryNotification, ListenerHandle, ListenerManager, NotifyFlags};
use crate::traits::{EntrySource, IncomingReceiver, NullReceiver, OutgoingReceiver, TableBackend};

/// The two entry indexes.
///
/// Invariant: every id in the id index names an entry in the name index whose
/// own id is that id. Entries with an unknown id live only in the name index.
#[derive(Debug, Default)]
pub struct EntryTables {
    named: HashMap<String, Entry>,
    ids: HashMap<EntryId, String>,
}

impl EntryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.named.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.named.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Name of the entry registered under `id`.
    pub fn name_for_id(&self, id: EntryId) -> Option<&str> {
        self.ids.get(&id).map(String::as_str)
    }

    pub fn by_id(&self, id: EntryId) -> Option<&Entry> {
        self.ids.get(&id).and_then(|name| self.named.get(name))
    }

    pub fn by_id_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        let name = self.ids.get(&id)?;
        self.named.get_mut(name)
    }

    /// Insert a new entry, indexing its id if known.
    ///
    /// Replaces any entry of the same name.
    pub fn insert(&mut self, entry: Entry) {
        let name = entry.name().to_owned();
        let id = entry.id();
        if let Some(old) = self.named.insert(name.clone(), entry) {
            self.unindex(old.id(), &name);
        }
        self.index(id, &name);
    }

    /// Move an entry to a new id, keeping both indexes consistent.
    ///
    /// An unknown `id` leaves the entry only in the name index. Another entry
    /// that held `id` before loses it.
    pub fn map_id(&mut self, name: &str, id: EntryId) {
        let Some(entry) = self.named.get_mut(name) else {
            return;
        };
        let old = entry.id();
        entry.set_id(id);
        self.unindex(old, name);
        self.index(id, name);
    }

    /// Forget every id. Names and values stay.
    pub fn clear_ids(&mut self) {
        self.ids.clear();
        for entry in self.named.values_mut() {
            entry.clear_id();
        }
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }

    /// Number of entries reachable by id.
    pub fn id_count(&self) -> usize {
        self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.named.values()
    }

    fn index(&mut self, id: EntryId, name: &str) {
        if !id.is_known() {
            return;
        }
        if let Some(previous) = self.ids.insert(id, name.to_owned()) {
            if previous != name {
                if let Some(entry) = self.named.get_mut(&previous) {
                    entry.clear_id();
                }
            }
        }
    }

    fn unindex(&mut self, id: EntryId, name: &str) {
        if id.is_known() && self.ids.get(&id).map(String::as_str) == Some(name) {
            self.ids.remove(&id);
        }
    }
}

/// The merge rules that differ between client and server.
///
/// Both methods run with the store lock held and must not block.
pub trait StoreRole: Send + 'static {
    /// Register an entry from an assignment or a first local write.
    fn add_entry(&mut self, tables: &mut EntryTables, entry: Entry) -> bool;

    /// Apply an update to an entry already located by id.
    fn update_entry(&mut self, entry: &mut Entry, sequence_number: SequenceNumber, value: Value)
        -> bool;
}

/// Result of offering an incoming update to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update was applied.
    Applied,
    /// Stale, duplicate or rejected by the role.
    Ignored,
    /// No entry is known under the id.
    UnknownId,
}

struct StoreState<R> {
    tables: EntryTables,
    role: R,
    persistent_dirty: bool,
    /// Notifications in the order their changes were applied.
    pending: VecDeque<EntryNotification>,
}

impl<R> StoreState<R> {
    fn queue(&mut self, wanted: bool, entry: &Entry, flags: NotifyFlags) {
        if wanted {
            self.pending.push_back(EntryNotification {
                name: entry.name().to_owned(),
                value: entry.value().clone(),
                flags,
            });
        }
    }
}

enum Outgoing {
    Assignment(Entry),
    Update(Entry),
}

/// Entry table for one node.
///
/// All access to the indexes goes through a single lock. Listeners and
/// receivers are called after it is released; listeners still see changes in
/// the order the lock applied them.
pub struct EntryStore<R> {
    state: Mutex<StoreState<R>>,
    /// Held by the one thread delivering queued notifications.
    delivery: Mutex<()>,
    listeners: ListenerManager<EntryNotification>,
    outgoing: RwLock<Arc<dyn OutgoingReceiver>>,
    incoming: RwLock<Arc<dyn IncomingReceiver>>,
}

impl<R: StoreRole> EntryStore<R> {
    pub fn new(role: R) -> Self {
        Self {
            state: Mutex::new(StoreState {
                tables: EntryTables::new(),
                role,
                persistent_dirty: false,
                pending: VecDeque::new(),
            }),
            delivery: Mutex::new(()),
            listeners: ListenerManager::new(),
            outgoing: RwLock::new(Arc::new(NullReceiver)),
            incoming: RwLock::new(Arc::new(NullReceiver)),
        }
    }

    pub fn set_outgoing_receiver(&self, receiver: Arc<dyn OutgoingReceiver>) {
        *self.outgoing.write() = receiver;
    }

    pub fn set_incoming_receiver(&self, receiver: Arc<dyn IncomingReceiver>) {
        *self.incoming.write() = receiver;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Register an entry through the role, without notifying anyone.
    pub fn add_entry(&self, entry: Entry) -> bool {
        let mut state = self.state.lock();
        let StoreState { tables, role, .. } = &mut *state;
        role.add_entry(tables, entry)
    }

    /// Apply an update through the role, without notifying anyone.
    ///
    /// Returns `false` when no entry is registered under `id`.
    pub fn update_entry(&self, id: EntryId, sequence_number: SequenceNumber, value: Value) -> bool {
        let mut state = self.state.lock();
        let StoreState { tables, role, .. } = &mut *state;
        match tables.by_id_mut(id) {
            Some(entry) => role.update_entry(entry, sequence_number, value),
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply an assignment received from a peer.
    ///
    /// Returns whether the role accepted it. Accepted assignments notify
    /// listeners and are forwarded to the incoming receiver.
    pub fn offer_incoming_assignment(&self, entry: Entry) -> bool {
        let name = entry.name().to_owned();
        let wanted = !self.listeners.is_empty();
        let applied = {
            let mut state = self.state.lock();
            let is_new = !state.tables.contains(&name);
            let StoreState { tables, role, .. } = &mut *state;
            if !role.add_entry(tables, entry) {
                None
            } else {
                let current = state.tables.get_mut(&name).map(|e| {
                    e.mark_dirty();
                    e.clone()
                });
                if let Some(current) = &current {
                    if current.is_persistent() {
                        state.persistent_dirty = true;
                    }
                    let kind = if is_new { NotifyFlags::NEW } else { NotifyFlags::UPDATE };
                    state.queue(wanted, current, kind);
                }
                current
            }
        };

        self.deliver_notifications();
        let Some(current) = applied else {
            debug!(name = %name, "assignment not applied");
            return false;
        };
        let receiver = self.incoming.read().clone();
        receiver.offer_incoming_assignment(&current);
        true
    }

    /// Apply an update received from a peer.
    ///
    /// Stale and duplicate sequence numbers are dropped here, before the role
    /// sees the update.
    pub fn offer_incoming_update(
        &self,
        id: EntryId,
        sequence_number: SequenceNumber,
        value: Value,
    ) -> UpdateOutcome {
        let wanted = !self.listeners.is_empty();
        let applied = {
            let mut state = self.state.lock();
            let StoreState {
                tables,
                role,
                persistent_dirty,
                ..
            } = &mut *state;
            let Some(entry) = tables.by_id_mut(id) else {
                return UpdateOutcome::UnknownId;
            };
            if !sequence_number.is_after(entry.sequence_number()) {
                debug!(
                    name = %entry.name(),
                    current = %entry.sequence_number(),
                    received = %sequence_number,
                    "dropping stale update"
                );
                return UpdateOutcome::Ignored;
            }
            if !role.update_entry(entry, sequence_number, value) {
                return UpdateOutcome::Ignored;
            }
            entry.mark_dirty();
            if entry.is_persistent() {
                *persistent_dirty = true;
            }
            let applied = entry.clone();
            state.queue(wanted, &applied, NotifyFlags::UPDATE);
            applied
        };

        self.deliver_notifications();
        let receiver = self.incoming.read().clone();
        receiver.offer_incoming_update(&applied);
        UpdateOutcome::Applied
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a value locally.
    ///
    /// A new name creates an entry and offers an assignment; an existing one
    /// is type-checked, bumped and offered as an update. Writing the value an
    /// entry already holds does nothing.
    pub fn put_outgoing(&self, name: &str, value: Value) -> Result<()> {
        validate_string(name).map_err(CoreError::from)?;
        validate_value(&value).map_err(CoreError::from)?;

        let wanted = !self.listeners.is_empty();
        let outgoing = {
            let mut state = self.state.lock();
            let StoreState {
                tables,
                role,
                persistent_dirty,
                ..
            } = &mut *state;
            match tables.get_mut(name) {
                Some(entry) => {
                    if entry.value() == &value {
                        return Ok(());
                    }
                    entry.set_value(value)?;
                    if entry.is_persistent() {
                        *persistent_dirty = true;
                    }
                    let entry = entry.clone();
                    state.queue(wanted, &entry, NotifyFlags::LOCAL | NotifyFlags::UPDATE);
                    Outgoing::Update(entry)
                }
                None => {
                    let mut entry = Entry::new(name, value);
                    entry.mark_dirty();
                    role.add_entry(tables, entry);
                    let Some(entry) = tables.get(name).cloned() else {
                        return Ok(());
                    };
                    state.queue(wanted, &entry, NotifyFlags::LOCAL | NotifyFlags::NEW);
                    Outgoing::Assignment(entry)
                }
            }
        };

        self.deliver_notifications();
        let receiver = self.outgoing.read().clone();
        match outgoing {
            Outgoing::Assignment(entry) => receiver.offer_outgoing_assignment(&entry),
            Outgoing::Update(entry) => receiver.offer_outgoing_update(&entry),
        }
        Ok(())
    }

    /// Replace an entry's flags. Returns `false` for an unknown name.
    pub fn set_flags(&self, name: &str, flags: EntryFlags) -> bool {
        let wanted = !self.listeners.is_empty();
        {
            let mut state = self.state.lock();
            let Some(entry) = state.tables.get_mut(name) else {
                return false;
            };
            if entry.flags() == flags {
                return true;
            }
            let persistence_changed = entry.is_persistent() != flags.contains(EntryFlags::PERSISTENT);
            entry.set_flags(flags);
            let changed = entry.clone();
            if persistence_changed {
                state.persistent_dirty = true;
            }
            state.queue(wanted, &changed, NotifyFlags::LOCAL | NotifyFlags::FLAGS);
        }
        self.deliver_notifications();
        true
    }

    pub fn flags(&self, name: &str) -> Option<EntryFlags> {
        self.state.lock().tables.get(name).map(Entry::flags)
    }

    /// Forget every server-assigned id; called when a connection is lost.
    pub fn clear_ids(&self) {
        self.state.lock().tables.clear_ids();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub fn entry(&self, name: &str) -> Option<Entry> {
        self.state.lock().tables.get(name).cloned()
    }

    pub fn entry_by_id(&self, id: EntryId) -> Option<Entry> {
        self.state.lock().tables.by_id(id).cloned()
    }

    /// Type of the entry under `id`; used to decode updates.
    pub fn entry_type_by_id(&self, id: EntryId) -> Option<EntryType> {
        self.state.lock().tables.by_id(id).map(Entry::entry_type)
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.state.lock().tables.get(name).map(|e| e.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().tables.contains(name)
    }

    /// All entry names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .tables
            .iter()
            .map(|e| e.name().to_owned())
            .collect();
        keys.sort();
        keys
    }

    /// Copy of every entry, sorted by name.
    pub fn snapshot(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.state.lock().tables.iter().cloned().collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }

    pub fn len(&self) -> usize {
        self.state.lock().tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries currently reachable by id.
    pub fn id_count(&self) -> usize {
        self.state.lock().tables.id_count()
    }

    /// Clone an entry and mark the stored one clean.
    ///
    /// Every change that reaches a receiver leaves the entry dirty, so a clean
    /// result means the change was already handed out.
    pub fn checkout(&self, name: &str) -> Option<Entry> {
        let mut state = self.state.lock();
        let entry = state.tables.get_mut(name)?;
        let copy = entry.clone();
        entry.mark_clean();
        Some(copy)
    }

    /// Persistent entries, if any changed since the last call.
    pub fn take_persistent_dirty(&self) -> Option<Vec<Entry>> {
        let mut state = self.state.lock();
        if !state.persistent_dirty {
            return None;
        }
        state.persistent_dirty = false;
        let mut entries: Vec<Entry> = state
            .tables
            .iter()
            .filter(|e| e.is_persistent())
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Some(entries)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a listener for names starting with `prefix`.
    pub fn add_entry_listener(
        &self,
        prefix: &str,
        immediate: bool,
        listener: EntryListener,
    ) -> ListenerHandle {
        if immediate {
            self.notify_existing(prefix, &listener);
        }
        let prefix = prefix.to_owned();
        self.listeners.add(move |n: &EntryNotification| {
            if n.name.starts_with(&prefix) {
                listener(n);
            }
        })
    }

    pub fn remove_entry_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }

    /// Call `listener` once for every entry under `prefix`, flagged `IMMEDIATE`.
    pub fn notify_existing(&self, prefix: &str, listener: &EntryListener) {
        for entry in self.snapshot() {
            if entry.name().starts_with(prefix) {
                listener(&EntryNotification {
                    name: entry.name().to_owned(),
                    value: entry.value().clone(),
                    flags: NotifyFlags::IMMEDIATE | NotifyFlags::NEW,
                });
            }
        }
    }

    /// Fire queued notifications in order.
    ///
    /// Only one thread delivers at a time. A caller that finds delivery busy
    /// leaves its notifications to the current deliverer, which re-checks the
    /// queue after letting go of the delivery lock. A listener that writes to
    /// the store therefore sees its own notification after it returns.
    fn deliver_notifications(&self) {
        loop {
            let Some(guard) = self.delivery.try_lock() else {
                return;
            };
            loop {
                let next = self.state.lock().pending.pop_front();
                match next {
                    Some(notification) => self.listeners.fire(&notification),
                    None => break,
                }
            }
            drop(guard);
            if self.state.lock().pending.is_empty() {
                return;
            }
        }
    }
}

impl<R: StoreRole> EntrySource for EntryStore<R> {
    fn checkout(&self, name: &str) -> Option<Entry> {
        EntryStore::checkout(self, name)
    }
}

impl<R: StoreRole> TableBackend for EntryStore<R> {
    fn value(&self, name: &str) -> Option<Value> {
        EntryStore::value(self, name)
    }

    fn put_value(&self, name: &str, value: Value) -> Result<()> {
        self.put_outgoing(name, value).map_err(|e| {
            if e.is_type_mismatch() {
                warn!(name = %name, error = %e, "rejected local write");
            }
            e
        })
    }

    fn keys(&self) -> Vec<String> {
        EntryStore::keys(self)
    }

    fn contains(&self, name: &str) -> bool {
        EntryStore::contains(self, name)
    }

    fn flags(&self, name: &str) -> Option<EntryFlags> {
        EntryStore::flags(self, name)
    }

    fn set_flags(&self, name: &str, flags: EntryFlags) -> bool {
        EntryStore::set_flags(self, name, flags)
    }

    fn add_entry_listener(
        &self,
        prefix: &str,
        immediate: bool,
        listener: EntryListener,
    ) -> ListenerHandle {
        EntryStore::add_entry_listener(self, prefix, immediate, listener)
    }

    fn remove_entry_listener(&self, handle: ListenerHandle) -> bool {
        EntryStore::remove_entry_listener(self, handle)
    }
}

impl<R> std::fmt::Debug for EntryStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_insert_indexes_known_ids() {
        let mut tables = EntryTables::new();
        tables.insert(Entry::new("local", Value::Boolean(true)));
        tables.insert(Entry::remote(
            "remote",
            EntryId::new(3),
            SequenceNumber::ZERO,
            Value::Double(1.0),
        ));

        assert_eq!(tables.len(), 2);
        assert_eq!(tables.id_count(), 1);
        assert_eq!(tables.name_for_id(EntryId::new(3)), Some("remote"));
    }

    #[test]
    fn test_map_id_rekeys() {
        let mut tables = EntryTables::new();
        tables.insert(Entry::remote(
            "a",
            EntryId::new(1),
            SequenceNumber::ZERO,
            Value::Double(1.0),
        ));
        tables.map_id("a", EntryId::new(2));

        assert!(tables.by_id(EntryId::new(1)).is_none());
        assert_eq!(tables.by_id(EntryId::new(2)).map(Entry::name), Some("a"));
        assert_eq!(tables.id_count(), 1);

        tables.map_id("a", EntryId::UNKNOWN);
        assert_eq!(tables.id_count(), 0);
        assert_eq!(tables.get("a").map(Entry::id), Some(EntryId::UNKNOWN));
    }

    #[test]
    fn test_map_id_steals_from_previous_holder() {
        let mut tables = EntryTables::new();
        tables.insert(Entry::remote(
            "a",
            EntryId::new(1),
            SequenceNumber::ZERO,
            Value::Double(1.0),
        ));
        tables.insert(Entry::new("b", Value::Double(2.0)));
        tables.map_id("b", EntryId::new(1));

        assert_eq!(tables.by_id(EntryId::new(1)).map(Entry::name), Some("b"));
        assert_eq!(tables.get("a").map(Entry::id), Some(EntryId::UNKNOWN));
        assert_eq!(tables.id_count(), 1);
    }

    #[test]
    fn test_clear_ids_resets_entries() {
        let mut tables = EntryTables::new();
        tables.insert(Entry::remote(
            "a",
            EntryId::new(1),
            SequenceNumber::ZERO,
            Value::Double(1.0),
        ));
        tables.clear_ids();

        assert_eq!(tables.id_count(), 0);
        assert_eq!(tables.get("a").map(Entry::id), Some(EntryId::UNKNOWN));
    }

    fn client_store() -> Arc<EntryStore<crate::client::ClientRole>> {
        Arc::new(EntryStore::new(crate::client::ClientRole))
    }

    #[test]
    fn test_listener_writes_are_delivered_after_the_triggering_change() {
        let store = client_store();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();

        let inner = Arc::downgrade(&store);
        let sink = Arc::clone(&seen);
        store.add_entry_listener(
            "",
            false,
            Arc::new(move |n: &EntryNotification| {
                sink.lock().push(n.name.clone());
                if n.name == "a" {
                    if let Some(store) = inner.upgrade() {
                        store.put_outgoing("b", Value::Boolean(true)).unwrap();
                    }
                }
            }),
        );

        store.put_outgoing("a", Value::Double(1.0)).unwrap();
        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.value("b"), Some(Value::Boolean(true)));
    }

    #[test]
    fn test_concurrent_writers_notify_in_apply_order() {
        const THREADS: u32 = 4;
        const WRITES: u32 = 250;

        for _ in 0..20 {
            let store = client_store();
            let last: Arc<Mutex<Option<Value>>> = Arc::default();
            let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
            let (sink, counter) = (Arc::clone(&last), Arc::clone(&count));
            store.add_entry_listener(
                "",
                false,
                Arc::new(move |n: &EntryNotification| {
                    *sink.lock() = Some(n.value.clone());
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }),
            );

            let writers: Vec<_> = (0..THREADS)
                .map(|t| {
                    let store = Arc::clone(&store);
                    std::thread::spawn(move || {
                        for i in 0..WRITES {
                            let value = f64::from(t * WRITES + i);
                            store.put_outgoing("speed", Value::Double(value)).unwrap();
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            assert_eq!(
                count.load(std::sync::atomic::Ordering::SeqCst),
                THREADS * WRITES
            );
            assert_eq!(*last.lock(), store.value("speed"));
        }
    }
}
