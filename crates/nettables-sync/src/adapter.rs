//! Client side of a connection: handshake, dispatch and self-healing.
//!
//! The adapter owns at most one live [`Connection`] and one reader task at a
//! time, both behind the connection lock. The reader task never tears its own
//! connection down; on any fault it hands the error to a fresh task that takes
//! the connection lock and decides between reconnecting and closing.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use nettables_core::{Entry, EntryId, TypeManager};
use nettables_store::{
    ClientEntryStore, ConnectionEvent, ListenerHandle, ListenerManager, UpdateOutcome,
};

use crate::connection::{Connection, MessageReader};
use crate::error::{Result, SyncError};
use crate::messages::{Message, PROTOCOL_REVISION};
use crate::state::ClientConnectionState;
use crate::transport::StreamFactory;
use crate::write_manager::OutgoingTarget;

/// The live connection and its reader.
///
/// `generation` increases on every new connection so late callbacks from an
/// old reader can be recognised and ignored.
#[derive(Default)]
struct Link {
    connection: Option<Arc<Connection>>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
}

/// Drives one client's connection to its server.
pub struct ClientConnectionAdapter {
    this: Weak<Self>,
    store: Arc<ClientEntryStore>,
    factory: Arc<dyn StreamFactory>,
    types: TypeManager,
    link: Mutex<Link>,
    state: RwLock<ClientConnectionState>,
    listeners: ListenerManager<ConnectionEvent>,
}

impl ClientConnectionAdapter {
    pub fn new(
        store: Arc<ClientEntryStore>,
        factory: Arc<dyn StreamFactory>,
        types: TypeManager,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store,
            factory,
            types,
            link: Mutex::new(Link::default()),
            state: RwLock::new(ClientConnectionState::Disconnected),
            listeners: ListenerManager::new(),
        })
    }

    pub fn connection_state(&self) -> ClientConnectionState {
        self.state.read().clone()
    }

    /// True iff the handshake has completed on the current connection.
    pub fn is_connected(&self) -> bool {
        self.state.read().is_in_sync()
    }

    pub fn add_connection_listener(
        &self,
        listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add(listener)
    }

    pub fn remove_connection_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop any current connection and open a new one.
    ///
    /// If the factory has no stream the adapter stays disconnected.
    pub async fn reconnect(&self) {
        let mut link = self.link.lock().await;
        self.reconnect_locked(&mut link).await;
    }

    /// Tear down into [`ClientConnectionState::Disconnected`]. Idempotent.
    pub async fn close(&self) {
        self.close_with(ClientConnectionState::Disconnected).await;
    }

    /// Tear down into the given state.
    pub async fn close_with(&self, state: ClientConnectionState) {
        let mut link = self.link.lock().await;
        self.teardown(&mut link, state).await;
    }

    /// Send a keep-alive on an open connection; reconnect if disconnected.
    ///
    /// Terminal states are left alone.
    pub async fn ensure_alive(&self) {
        let state = self.connection_state();
        match state {
            ClientConnectionState::Disconnected => self.reconnect().await,
            ref s if s.has_connection() => {
                let current = {
                    let link = self.link.lock().await;
                    link.connection.clone().map(|c| (c, link.generation))
                };
                if let Some((connection, generation)) = current {
                    if let Err(e) = connection.send_now(&Message::KeepAlive).await {
                        self.handle_fault(generation, e).await;
                    }
                }
            }
            _ => {}
        }
    }

    async fn reconnect_locked(&self, link: &mut Link) {
        self.teardown(link, ClientConnectionState::Disconnected).await;

        let Some(stream) = self.factory.create().await else {
            debug!("no server available");
            return;
        };
        let (connection, reader) = Connection::open(stream, self.types.clone());
        let connection = Arc::new(connection);

        link.generation = link.generation.wrapping_add(1);
        link.connection = Some(Arc::clone(&connection));
        self.set_state(ClientConnectionState::ConnectedToServer);
        link.reader = Some(tokio::spawn(read_loop(
            self.this.clone(),
            Arc::clone(&self.store),
            link.generation,
            reader,
        )));

        let hello = Message::ClientHello {
            revision: PROTOCOL_REVISION,
        };
        match connection.send_now(&hello).await {
            Ok(()) => self.set_state(ClientConnectionState::SentHelloToServer),
            Err(e) => {
                warn!(error = %e, "client hello failed");
                self.teardown(link, ClientConnectionState::Disconnected).await;
            }
        }
    }

    async fn teardown(&self, link: &mut Link, state: ClientConnectionState) {
        if let Some(reader) = link.reader.take() {
            reader.abort();
        }
        if let Some(connection) = link.connection.take() {
            connection.shutdown().await;
        }
        self.store.clear_ids();
        self.set_state(state);
    }

    fn set_state(&self, new: ClientConnectionState) {
        let old = std::mem::replace(&mut *self.state.write(), new.clone());
        if old == new {
            return;
        }
        info!(from = %old, to = %new, "connection state changed");
        match (old.is_in_sync(), new.is_in_sync()) {
            (false, true) => self.listeners.fire(&ConnectionEvent::Connected),
            (true, false) => self.listeners.fire(&ConnectionEvent::Disconnected),
            _ => {}
        }
    }

    /// React to a failure on connection `generation`.
    ///
    /// I/O errors reconnect, everything else closes into a terminal state.
    async fn handle_fault(&self, generation: u64, error: SyncError) {
        let mut link = self.link.lock().await;
        if link.generation != generation || link.connection.is_none() {
            trace!(error = %error, "ignoring fault from a closed connection");
            return;
        }
        match error {
            SyncError::ProtocolUnsupported { server, .. } => {
                warn!(
                    local = PROTOCOL_REVISION,
                    server, "server does not support our protocol revision"
                );
                let state = ClientConnectionState::ProtocolUnsupportedByServer {
                    server_revision: server,
                };
                self.teardown(&mut link, state).await;
            }
            error if error.is_io() => {
                debug!(error = %error, "connection lost, reconnecting");
                let state = self.connection_state();
                if !matches!(state, ClientConnectionState::Disconnected) {
                    self.reconnect_locked(&mut link).await;
                }
            }
            error => {
                warn!(error = %error, "closing connection");
                let state = ClientConnectionState::Error(Arc::new(error));
                self.teardown(&mut link, state).await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming
    // ─────────────────────────────────────────────────────────────────────────

    async fn dispatch(&self, generation: u64, message: Message) -> Result<()> {
        trace!(message = message.name(), "received");
        match message {
            Message::KeepAlive => Ok(()),
            Message::ServerHelloComplete => self.complete_handshake(generation).await,
            Message::ProtocolUnsupported { revision } => Err(SyncError::ProtocolUnsupported {
                local: PROTOCOL_REVISION,
                server: revision,
            }),
            assignment @ Message::EntryAssignment { .. } => {
                if let Some(entry) = assignment.into_entry() {
                    self.store.offer_incoming_assignment(entry);
                }
                Ok(())
            }
            Message::EntryUpdate {
                id,
                sequence_number,
                value,
            } => match self.store.offer_incoming_update(id, sequence_number, value) {
                UpdateOutcome::UnknownId => Err(SyncError::BadMessage(format!(
                    "update for unknown entry id {}",
                    id
                ))),
                UpdateOutcome::Applied | UpdateOutcome::Ignored => Ok(()),
            },
            Message::ClientHello { .. } => Err(SyncError::BadMessage(
                "client hello received from server".into(),
            )),
        }
    }

    async fn complete_handshake(&self, generation: u64) -> Result<()> {
        let link = self.link.lock().await;
        if link.generation != generation {
            return Ok(());
        }
        let state = self.connection_state();
        if !matches!(
            state,
            ClientConnectionState::ConnectedToServer | ClientConnectionState::SentHelloToServer
        ) {
            return Err(SyncError::BadMessage(format!(
                "server hello complete while {}",
                state
            )));
        }
        let Some(connection) = link.connection.clone() else {
            return Ok(());
        };
        self.set_state(ClientConnectionState::InSyncWithServer);
        let offered = self.store.send_unknown_entries(connection.as_ref()).await?;
        debug!(offered, "handshake complete");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing
    // ─────────────────────────────────────────────────────────────────────────

    /// The current connection, only while in sync.
    async fn synced_connection(&self) -> Option<(Arc<Connection>, u64)> {
        let link = self.link.lock().await;
        if !self.is_connected() {
            return None;
        }
        link.connection.clone().map(|c| (c, link.generation))
    }

    async fn send_outgoing(&self, message: Message) {
        let Some((connection, generation)) = self.synced_connection().await else {
            trace!(message = message.name(), "not in sync, dropping");
            return;
        };
        match connection.send(&message).await {
            Ok(()) => {}
            Err(SyncError::Codec(e)) => warn!(error = %e, "could not encode outgoing message"),
            Err(e) => self.handle_fault(generation, e).await,
        }
    }

    /// Send an assignment; dropped unless in sync.
    pub async fn offer_outgoing_assignment(&self, entry: &Entry) {
        self.send_outgoing(Message::assignment(entry)).await;
    }

    /// Send an update; dropped unless in sync.
    pub async fn offer_outgoing_update(&self, entry: &Entry) {
        self.send_outgoing(Message::update(entry)).await;
    }

    pub async fn flush(&self) {
        let Some((connection, generation)) = self.synced_connection().await else {
            return;
        };
        if let Err(e) = connection.flush().await {
            self.handle_fault(generation, e.into()).await;
        }
    }
}

type ReadLoop = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Boxed so the reader's `Send` bound doesn't depend on the fault path that
/// spawns new readers.
fn read_loop(
    adapter: Weak<ClientConnectionAdapter>,
    store: Arc<ClientEntryStore>,
    generation: u64,
    mut reader: MessageReader,
) -> ReadLoop {
    Box::pin(async move {
        let lookup = move |id: EntryId| store.entry_type_by_id(id);
        loop {
            let result = reader.next(&lookup).await;
            let Some(adapter) = adapter.upgrade() else {
                return;
            };
            let fault = match result {
                Ok(Some(message)) => match adapter.dispatch(generation, message).await {
                    Ok(()) => continue,
                    Err(e) => e,
                },
                Ok(None) => SyncError::closed(),
                Err(e) => e,
            };
            tokio::spawn(async move { adapter.handle_fault(generation, fault).await });
            return;
        }
    })
}

#[async_trait]
impl OutgoingTarget for ClientConnectionAdapter {
    async fn send_assignment(&self, entry: &Entry) {
        self.offer_outgoing_assignment(entry).await;
    }

    async fn send_update(&self, entry: &Entry) {
        self.offer_outgoing_update(entry).await;
    }

    async fn flush(&self) {
        ClientConnectionAdapter::flush(self).await;
    }

    async fn ensure_alive(&self) {
        ClientConnectionAdapter::ensure_alive(self).await;
    }
}

impl Drop for ClientConnectionAdapter {
    fn drop(&mut self) {
        if let Some(reader) = self.link.get_mut().reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for ClientConnectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnectionAdapter")
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}
