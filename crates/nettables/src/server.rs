//! Server node: the authoritative store and every connected client.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use nettables_core::EntryFlags;
use nettables_store::{PersistentStore, ServerEntryStore, TableBackend};
use nettables_sync::{ServerConnectionList, StreamAcceptor, TcpAcceptor, WriteManager};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{NtError, Result};
use crate::node::NetworkTableNode;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A server node.
///
/// Changes from one client are applied to the server's store and rebroadcast
/// to every client on the next write interval, together with the server's own
/// writes.
pub struct NetworkTableServer {
    store: Arc<ServerEntryStore>,
    connections: Arc<ServerConnectionList>,
    write_manager: Arc<WriteManager>,
    persistence: Option<PersistentStore>,
    config: ServerConfig,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkTableServer {
    /// Build a server, loading persistent entries if a database is configured.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let persistence = match &config.persistence_path {
            Some(path) => Some(PersistentStore::open(path)?),
            None => None,
        };
        Self::with_persistence(config, persistence).await
    }

    /// Build a server around an already opened database.
    pub async fn with_persistence(
        config: ServerConfig,
        persistence: Option<PersistentStore>,
    ) -> Result<Self> {
        let store = Arc::new(ServerEntryStore::server());
        if let Some(db) = &persistence {
            let loaded = load_persistent(&store, db).await?;
            info!(count = loaded, "loaded persistent entries");
        }

        let connections = ServerConnectionList::new(store.clone(), config.type_manager.clone());
        let write_manager =
            WriteManager::new(store.clone(), connections.clone(), config.write_manager());
        store.set_outgoing_receiver(write_manager.clone());
        store.set_incoming_receiver(write_manager.clone());

        Ok(Self {
            store,
            connections,
            write_manager,
            persistence,
            config,
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bind a TCP listener per the configuration and start serving.
    pub async fn bind_tcp(config: ServerConfig) -> Result<Self> {
        let acceptor = TcpAcceptor::bind((config.bind_addr.as_str(), config.port)).await?;
        let addr = acceptor.local_addr()?;
        let server = Self::new(config).await?;
        *server.local_addr.lock() = Some(addr);
        server.start(Arc::new(acceptor))?;
        info!(%addr, "listening");
        Ok(server)
    }

    /// Start accepting clients from `acceptor`, broadcasting and persisting.
    pub fn start(&self, acceptor: Arc<dyn StreamAcceptor>) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(NtError::AlreadyRunning);
        }

        self.write_manager.start();
        tasks.push(tokio::spawn(accept_loop(
            acceptor,
            Arc::downgrade(&self.connections),
        )));
        if let Some(db) = &self.persistence {
            tasks.push(tokio::spawn(persist_loop(
                Arc::downgrade(&self.store),
                db.clone(),
                self.config.persist_interval,
            )));
        }
        debug!("server started");
        Ok(())
    }

    /// Stop serving: close every client and save persistent entries.
    pub async fn stop(&self) -> Result<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.write_manager.stop();
        self.write_manager.flush_pending().await;
        self.connections.close_all().await;
        self.save_persistent().await?;
        info!("server stopped");
        Ok(())
    }

    /// Save persistent entries now if any changed. Returns how many were saved.
    pub async fn save_persistent(&self) -> Result<usize> {
        let Some(db) = &self.persistence else {
            return Ok(0);
        };
        match self.store.take_persistent_dirty() {
            Some(entries) => Ok(db.save(&entries).await?),
            None => Ok(0),
        }
    }

    pub fn store(&self) -> &Arc<ServerEntryStore> {
        &self.store
    }

    /// Address of the TCP listener, if bound with [`bind_tcp`](Self::bind_tcp).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Clients that have completed their handshake.
    pub fn connection_count(&self) -> usize {
        self.connections.connected_count()
    }

    /// Drop every client. They will reconnect on their own.
    pub async fn close_connections(&self) {
        self.connections.close_all().await;
    }

    /// Broadcast pending changes now instead of waiting for the next tick.
    pub async fn flush(&self) -> usize {
        self.write_manager.flush_pending().await
    }
}

impl NetworkTableNode for NetworkTableServer {
    fn backend(&self) -> Arc<dyn TableBackend> {
        self.store.clone()
    }

    /// A server is always in sync with itself.
    fn is_connected(&self) -> bool {
        true
    }
}

impl Drop for NetworkTableServer {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        self.write_manager.stop();
        // The store holds the write manager, which holds the store.
        let null = Arc::new(nettables_store::NullReceiver);
        self.store.set_outgoing_receiver(null.clone());
        self.store.set_incoming_receiver(null);
    }
}

impl std::fmt::Debug for NetworkTableServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTableServer")
            .field("local_addr", &self.local_addr())
            .field("clients", &self.connection_count())
            .field("entries", &self.store.len())
            .finish()
    }
}

async fn load_persistent(store: &ServerEntryStore, db: &PersistentStore) -> Result<usize> {
    let rows = db.load().await?;
    let count = rows.len();
    for (name, value) in rows {
        if let Err(e) = store.put_outgoing(&name, value) {
            warn!(name = %name, error = %e, "skipping persisted entry");
            continue;
        }
        store.set_flags(&name, EntryFlags::PERSISTENT);
    }
    // What was just loaded is already on disk.
    store.take_persistent_dirty();
    Ok(count)
}

async fn accept_loop(acceptor: Arc<dyn StreamAcceptor>, connections: Weak<ServerConnectionList>) {
    loop {
        match acceptor.accept().await {
            Ok(stream) => {
                let Some(list) = connections.upgrade() else {
                    return;
                };
                list.accept(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                debug!("acceptor closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn persist_loop(store: Weak<ServerEntryStore>, db: PersistentStore, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else {
            return;
        };
        let Some(entries) = store.take_persistent_dirty() else {
            continue;
        };
        drop(store);
        if let Err(e) = db.save(&entries).await {
            warn!(error = %e, "saving persistent entries failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettables_core::Value;

    #[tokio::test]
    async fn test_persistent_entries_reload() {
        let db = PersistentStore::open_memory().unwrap();
        {
            let server = NetworkTableServer::with_persistence(ServerConfig::default(), Some(db.clone()))
                .await
                .unwrap();
            let table = server.table("prefs");
            assert!(table.put_number("gain", 0.25));
            assert!(table.set_persistent("gain"));
            assert!(table.put_number("scratch", 1.0));
            assert_eq!(server.save_persistent().await.unwrap(), 1);
            assert_eq!(server.save_persistent().await.unwrap(), 0);
        }

        let server = NetworkTableServer::with_persistence(ServerConfig::default(), Some(db))
            .await
            .unwrap();
        let table = server.table("prefs");
        assert_eq!(table.get_number("gain"), Some(0.25));
        assert!(table.is_persistent("gain"));
        assert!(!table.contains_key("scratch"));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = NetworkTableServer::new(ServerConfig::default()).await.unwrap();
        let (_factory, listener) = nettables_sync::transport::memory::channel();
        let listener = Arc::new(listener);
        server.start(listener.clone()).unwrap();
        assert!(matches!(
            server.start(listener),
            Err(NtError::AlreadyRunning)
        ));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_is_always_connected() {
        let server = NetworkTableServer::new(ServerConfig::default()).await.unwrap();
        assert!(server.is_connected());
        assert!(server.root().put_value("x", Value::Boolean(true)));
        assert_eq!(server.store().entry("/x").map(|e| e.id().raw()), Some(0));
    }
}
