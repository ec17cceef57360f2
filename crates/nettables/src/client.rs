//! Client node: a store kept in step with one server.

use std::sync::Arc;

use nettables_store::{
    ClientEntryStore, ConnectionEvent, ListenerHandle, NullReceiver, TableBackend,
};
use nettables_sync::{
    ClientConnectionAdapter, ClientConnectionState, StreamFactory, TcpStreamFactory, WriteManager,
};
use tracing::info;

use crate::config::ClientConfig;
use crate::node::NetworkTableNode;

/// A client node.
///
/// Local writes land in the store immediately and reach the server on the next
/// write interval. The connection heals itself after I/O failures; protocol
/// errors leave it closed until [`reconnect`](Self::reconnect) is called.
///
/// Must be created inside a tokio runtime.
pub struct NetworkTableClient {
    store: Arc<ClientEntryStore>,
    adapter: Arc<ClientConnectionAdapter>,
    write_manager: Arc<WriteManager>,
}

impl NetworkTableClient {
    /// Wire a client around `factory` and start its write loop.
    ///
    /// No connection is attempted until [`reconnect`](Self::reconnect) or the
    /// first keep-alive tick.
    pub fn new(factory: Arc<dyn StreamFactory>, config: &ClientConfig) -> Self {
        let store = Arc::new(ClientEntryStore::client());
        let adapter =
            ClientConnectionAdapter::new(Arc::clone(&store), factory, config.type_manager.clone());
        let write_manager = WriteManager::new(
            store.clone(),
            adapter.clone(),
            config.write_manager(),
        );
        store.set_outgoing_receiver(write_manager.clone());
        store.set_incoming_receiver(Arc::new(NullReceiver));
        write_manager.start();

        Self {
            store,
            adapter,
            write_manager,
        }
    }

    /// Client for the TCP server named in `config`, connecting right away.
    ///
    /// An unreachable server is not an error; the client keeps retrying.
    pub async fn connect(config: ClientConfig) -> Self {
        let factory = TcpStreamFactory::new(config.host.clone(), config.port, config.connect_timeout);
        let client = Self::new(Arc::new(factory), &config);
        info!(host = %config.host, port = config.port, "connecting");
        client.reconnect().await;
        client
    }

    pub fn store(&self) -> &Arc<ClientEntryStore> {
        &self.store
    }

    pub fn connection_state(&self) -> ClientConnectionState {
        self.adapter.connection_state()
    }

    pub fn add_connection_listener(
        &self,
        listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.adapter.add_connection_listener(listener)
    }

    pub fn remove_connection_listener(&self, handle: ListenerHandle) -> bool {
        self.adapter.remove_connection_listener(handle)
    }

    /// Drop the current connection, if any, and open a new one.
    pub async fn reconnect(&self) {
        self.adapter.reconnect().await;
    }

    /// Close the connection. The write loop keeps running, so the next
    /// keep-alive reconnects.
    pub async fn close(&self) {
        self.adapter.close().await;
    }

    /// Stop the write loop and close the connection.
    pub async fn stop(&self) {
        self.write_manager.stop();
        self.adapter.close().await;
        info!("client stopped");
    }

    /// Send pending writes now instead of waiting for the next tick.
    pub async fn flush(&self) -> usize {
        self.write_manager.flush_pending().await
    }
}

impl NetworkTableNode for NetworkTableClient {
    fn backend(&self) -> Arc<dyn TableBackend> {
        self.store.clone()
    }

    /// True once the handshake with the server has completed.
    fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }
}

impl Drop for NetworkTableClient {
    fn drop(&mut self) {
        self.write_manager.stop();
        // The store holds the write manager, which holds the store.
        self.store.set_outgoing_receiver(Arc::new(NullReceiver));
    }
}

impl std::fmt::Debug for NetworkTableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTableClient")
            .field("state", &self.connection_state())
            .field("entries", &self.store.len())
            .finish()
    }
}
