//! Server side of the protocol: one adapter per client, plus the list that
//! broadcasts to all of them.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use nettables_core::{Entry, EntryId, TypeManager};
use nettables_store::{ServerEntryStore, UpdateOutcome};

use crate::connection::{Connection, MessageReader};
use crate::error::{Result, SyncError};
use crate::messages::{Message, PROTOCOL_REVISION};
use crate::state::ServerConnectionState;
use crate::transport::BoxedStream;
use crate::write_manager::OutgoingTarget;

/// One accepted client.
pub struct ServerConnectionAdapter {
    id: u64,
    store: Arc<ServerEntryStore>,
    connection: Connection,
    /// Held for the whole handshake and for every broadcast write, so a client
    /// never sees a broadcast interleaved with its snapshot.
    send_lock: Mutex<()>,
    state: RwLock<ServerConnectionState>,
    reader: SyncMutex<Option<JoinHandle<()>>>,
    list: Weak<ServerConnectionList>,
}

impl ServerConnectionAdapter {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ServerConnectionState {
        self.state.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected()
    }

    fn set_state(&self, new: ServerConnectionState) {
        let old = std::mem::replace(&mut *self.state.write(), new.clone());
        info!(client = self.id, from = %old, to = %new, "client state changed");
    }

    /// Close the connection and forget it. Idempotent.
    pub async fn close(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.finish(ServerConnectionState::ClientDisconnected).await;
    }

    async fn finish(&self, state: ServerConnectionState) {
        if self.state.read().is_closed() {
            return;
        }
        self.set_state(state);
        self.connection.shutdown().await;
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }

    async fn fail(&self, error: SyncError) {
        if error.is_io() {
            debug!(client = self.id, error = %error, "client connection lost");
            self.finish(ServerConnectionState::ClientDisconnected).await;
        } else {
            warn!(client = self.id, error = %error, "closing client connection");
            self.finish(ServerConnectionState::Error(Arc::new(error)))
                .await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming
    // ─────────────────────────────────────────────────────────────────────────

    async fn dispatch(&self, message: Message) -> Result<()> {
        trace!(client = self.id, message = message.name(), "received");
        match message {
            Message::KeepAlive => Ok(()),
            Message::ClientHello { revision } => self.handshake(revision).await,
            assignment @ Message::EntryAssignment { .. } => {
                self.require_connected("entry assignment")?;
                if let Some(entry) = assignment.into_entry() {
                    self.accept_assignment(entry).await?;
                }
                Ok(())
            }
            Message::EntryUpdate {
                id,
                sequence_number,
                value,
            } => {
                self.require_connected("entry update")?;
                match self.store.offer_incoming_update(id, sequence_number, value) {
                    UpdateOutcome::UnknownId => Err(SyncError::BadMessage(format!(
                        "update for unknown entry id {}",
                        id
                    ))),
                    UpdateOutcome::Applied | UpdateOutcome::Ignored => Ok(()),
                }
            }
            other => Err(SyncError::BadMessage(format!(
                "{} received from client",
                other.name()
            ))),
        }
    }

    fn require_connected(&self, what: &str) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::BadMessage(format!(
                "{} before handshake completed",
                what
            )))
        }
    }

    async fn handshake(&self, revision: u16) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        if !matches!(self.state(), ServerConnectionState::GotConnectionFromClient) {
            return Err(SyncError::BadMessage("repeated client hello".into()));
        }
        if revision != PROTOCOL_REVISION {
            self.connection
                .send_now(&Message::ProtocolUnsupported {
                    revision: PROTOCOL_REVISION,
                })
                .await?;
            return Err(SyncError::ProtocolUnsupported {
                local: PROTOCOL_REVISION,
                server: revision,
            });
        }

        let sent = self.store.send_all_entries(&self.connection).await?;
        self.connection.send(&Message::ServerHelloComplete).await?;
        // Broadcasts wait on the send lock, so none can slip in before the flush.
        self.set_state(ServerConnectionState::ConnectedToClient);
        self.connection.flush().await?;
        debug!(client = self.id, entries = sent, "handshake complete");
        Ok(())
    }

    async fn accept_assignment(&self, entry: Entry) -> Result<()> {
        if entry.id().is_known() {
            warn!(
                client = self.id,
                name = %entry.name(),
                id = %entry.id(),
                "ignoring client assignment with an id"
            );
            return Ok(());
        }
        let name = entry.name().to_owned();
        if self.store.offer_incoming_assignment(entry) {
            return Ok(());
        }
        // Name already taken: tell the client which id it has.
        if let Some(existing) = self.store.entry(&name) {
            let _guard = self.send_lock.lock().await;
            self.connection.send_now(&Message::assignment(&existing)).await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing
    // ─────────────────────────────────────────────────────────────────────────

    /// Buffer a message if the handshake has completed; otherwise drop it.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        if !self.is_connected() {
            return Ok(());
        }
        self.connection.send(message).await
    }

    pub async fn flush(&self) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        if !self.is_connected() {
            return Ok(());
        }
        self.connection.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for ServerConnectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnectionAdapter")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

type ReadLoop = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

fn read_loop(adapter: Weak<ServerConnectionAdapter>, mut reader: MessageReader) -> ReadLoop {
    Box::pin(async move {
        let Some(store) = adapter.upgrade().map(|a| Arc::clone(&a.store)) else {
            return;
        };
        let lookup = move |id: EntryId| store.entry_type_by_id(id);
        loop {
            let result = reader.next(&lookup).await;
            let Some(adapter) = adapter.upgrade() else {
                return;
            };
            let fault = match result {
                Ok(Some(message)) => match adapter.dispatch(message).await {
                    Ok(()) => continue,
                    Err(e) => e,
                },
                Ok(None) => SyncError::closed(),
                Err(e) => e,
            };
            adapter.fail(fault).await;
            return;
        }
    })
}

/// Every live client of a server.
///
/// Broadcasts go to clients that have completed their handshake; a client
/// whose connection fails during a broadcast is closed and removed.
pub struct ServerConnectionList {
    this: Weak<Self>,
    store: Arc<ServerEntryStore>,
    types: TypeManager,
    next_id: AtomicU64,
    connections: RwLock<BTreeMap<u64, Arc<ServerConnectionAdapter>>>,
}

impl ServerConnectionList {
    pub fn new(store: Arc<ServerEntryStore>, types: TypeManager) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store,
            types,
            next_id: AtomicU64::new(1),
            connections: RwLock::new(BTreeMap::new()),
        })
    }

    /// Adopt a freshly accepted stream and start reading from it.
    pub fn accept(&self, stream: BoxedStream) -> Arc<ServerConnectionAdapter> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (connection, reader) = Connection::open(stream, self.types.clone());
        let adapter = Arc::new(ServerConnectionAdapter {
            id,
            store: Arc::clone(&self.store),
            connection,
            send_lock: Mutex::new(()),
            state: RwLock::new(ServerConnectionState::GotConnectionFromClient),
            reader: SyncMutex::new(None),
            list: self.this.clone(),
        });
        self.connections.write().insert(id, Arc::clone(&adapter));
        let task = tokio::spawn(read_loop(Arc::downgrade(&adapter), reader));
        *adapter.reader.lock() = Some(task);
        info!(client = id, "client connected");
        adapter
    }

    fn remove(&self, id: u64) {
        if self.connections.write().remove(&id).is_some() {
            info!(client = id, "client removed");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clients that have completed their handshake.
    pub fn connected_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.is_connected())
            .count()
    }

    fn snapshot(&self) -> Vec<Arc<ServerConnectionAdapter>> {
        self.connections.read().values().cloned().collect()
    }

    /// Send `message` to every connected client.
    pub async fn broadcast(&self, message: &Message) {
        for client in self.snapshot() {
            if let Err(e) = client.send(message).await {
                client.fail(e).await;
            }
        }
    }

    pub async fn flush_all(&self) {
        for client in self.snapshot() {
            if let Err(e) = client.flush().await {
                client.fail(e).await;
            }
        }
    }

    /// Close every client.
    pub async fn close_all(&self) {
        for client in self.snapshot() {
            client.close().await;
        }
    }
}

#[async_trait]
impl OutgoingTarget for ServerConnectionList {
    async fn send_assignment(&self, entry: &Entry) {
        self.broadcast(&Message::assignment(entry)).await;
    }

    async fn send_update(&self, entry: &Entry) {
        self.broadcast(&Message::update(entry)).await;
    }

    async fn flush(&self) {
        self.flush_all().await;
    }

    async fn ensure_alive(&self) {
        self.broadcast(&Message::KeepAlive).await;
        self.flush_all().await;
    }
}

impl std::fmt::Debug for ServerConnectionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnectionList")
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettables_core::{EntryId, EntryType, SequenceNumber, Value};
    use std::time::Duration;

    struct FakeClient {
        connection: Connection,
        reader: MessageReader,
    }

    impl FakeClient {
        fn attach(list: &ServerConnectionList) -> Self {
            let (client, server) = tokio::io::duplex(64 * 1024);
            list.accept(Box::new(server));
            let (connection, reader) = Connection::open(Box::new(client), TypeManager::new());
            Self { connection, reader }
        }

        async fn send(&self, message: Message) {
            self.connection.send_now(&message).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Message> {
            let lookup = |_: EntryId| Some(EntryType::Double);
            tokio::time::timeout(Duration::from_secs(2), self.reader.next(&lookup))
                .await
                .unwrap()
                .unwrap()
        }

        async fn hello(&mut self) -> Vec<Message> {
            self.send(Message::ClientHello {
                revision: PROTOCOL_REVISION,
            })
            .await;
            let mut received = Vec::new();
            loop {
                match self.recv().await {
                    Some(Message::ServerHelloComplete) => return received,
                    Some(other) => received.push(other),
                    None => panic!("closed during handshake"),
                }
            }
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn setup() -> (Arc<ServerEntryStore>, Arc<ServerConnectionList>) {
        let store = Arc::new(ServerEntryStore::server());
        let list = ServerConnectionList::new(store.clone(), TypeManager::new());
        (store, list)
    }

    #[tokio::test]
    async fn test_hello_sends_snapshot_then_complete() {
        let (store, list) = setup();
        store.put_outgoing("a", Value::Double(1.0)).unwrap();
        store.put_outgoing("b", Value::Double(2.0)).unwrap();

        let mut client = FakeClient::attach(&list);
        let snapshot = client.hello().await;

        let names: Vec<String> = snapshot
            .into_iter()
            .filter_map(|m| m.into_entry().map(|e| e.name().to_owned()))
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        wait_for(|| list.connected_count() == 1).await;
    }

    #[tokio::test]
    async fn test_wrong_revision_is_refused() {
        let (_store, list) = setup();
        let mut client = FakeClient::attach(&list);
        client.send(Message::ClientHello { revision: 0x0300 }).await;

        assert_eq!(
            client.recv().await,
            Some(Message::ProtocolUnsupported {
                revision: PROTOCOL_REVISION
            })
        );
        assert_eq!(client.recv().await, None);
        wait_for(|| list.is_empty()).await;
    }

    #[tokio::test]
    async fn test_client_assignment_gets_id_and_is_stored() {
        let (store, list) = setup();
        let mut client = FakeClient::attach(&list);
        client.hello().await;

        client
            .send(Message::EntryAssignment {
                name: "speed".into(),
                id: EntryId::UNKNOWN,
                sequence_number: SequenceNumber::ZERO,
                value: Value::Double(4.0),
            })
            .await;

        wait_for(|| store.contains("speed")).await;
        assert_eq!(store.entry("speed").unwrap().id(), EntryId::new(0));
    }

    #[tokio::test]
    async fn test_duplicate_assignment_answered_with_existing() {
        let (store, list) = setup();
        store.put_outgoing("speed", Value::Double(1.0)).unwrap();
        let mut client = FakeClient::attach(&list);
        client.hello().await;

        client
            .send(Message::EntryAssignment {
                name: "speed".into(),
                id: EntryId::UNKNOWN,
                sequence_number: SequenceNumber::ZERO,
                value: Value::Double(9.0),
            })
            .await;

        match client.recv().await {
            Some(Message::EntryAssignment { name, id, value, .. }) => {
                assert_eq!(name, "speed");
                assert_eq!(id, EntryId::new(0));
                assert_eq!(value, Value::Double(1.0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.value("speed"), Some(Value::Double(1.0)));
    }

    #[tokio::test]
    async fn test_assignment_with_id_ignored() {
        let (store, list) = setup();
        let mut client = FakeClient::attach(&list);
        client.hello().await;

        client
            .send(Message::EntryAssignment {
                name: "rogue".into(),
                id: EntryId::new(7),
                sequence_number: SequenceNumber::ZERO,
                value: Value::Double(1.0),
            })
            .await;
        client.send(Message::KeepAlive).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.contains("rogue"));
        assert_eq!(list.connected_count(), 1);
    }

    #[tokio::test]
    async fn test_assignment_before_hello_is_bad() {
        let (_store, list) = setup();
        let mut client = FakeClient::attach(&list);
        client
            .send(Message::EntryAssignment {
                name: "early".into(),
                id: EntryId::UNKNOWN,
                sequence_number: SequenceNumber::ZERO,
                value: Value::Double(1.0),
            })
            .await;
        assert_eq!(client.recv().await, None);
        wait_for(|| list.is_empty()).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_connected_clients_only() {
        let (store, list) = setup();
        store.put_outgoing("a", Value::Double(1.0)).unwrap();
        let mut ready = FakeClient::attach(&list);
        ready.hello().await;
        let _pending = FakeClient::attach(&list);
        wait_for(|| list.len() == 2).await;

        let entry = store.entry("a").unwrap();
        list.send_update(&entry).await;
        list.flush().await;

        match ready.recv().await {
            Some(Message::EntryUpdate { id, value, .. }) => {
                assert_eq!(id, entry.id());
                assert_eq!(value, Value::Double(1.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_removes_client() {
        let (_store, list) = setup();
        let mut client = FakeClient::attach(&list);
        client.hello().await;
        client.connection.shutdown().await;
        drop(client);
        wait_for(|| list.is_empty()).await;
    }
}
