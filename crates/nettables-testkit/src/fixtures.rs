//! Test fixtures and helpers.
//!
//! Recording stand-ins for the sink and target traits, an entry builder, and
//! an in-process server that hands out connected clients.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use nettables::{ClientConfig, NetworkTableClient, NetworkTableNode, NetworkTableServer, ServerConfig};
use nettables_core::{Entry, EntryFlags, EntryId, SequenceNumber, Value};
use nettables_store::EntrySink;
use nettables_sync::transport::memory::{self, MemoryStreamFactory};
use nettables_sync::OutgoingTarget;

/// What a recording sink or target saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Assignment(Entry),
    Update(Entry),
    Flush,
    KeepAlive,
}

/// An [`EntrySink`] and [`OutgoingTarget`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Recorded>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later sink call fail with `BrokenPipe`.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    /// Names of recorded assignments, in order.
    pub fn assigned_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Assignment(entry) => Some(entry.name().to_owned()),
                _ => None,
            })
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Recorded::Flush))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: Recorded) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "recording sink failed"));
        }
        self.events.lock().push(event);
        Ok(())
    }
}

#[async_trait]
impl EntrySink for RecordingSink {
    async fn send_entry_assignment(&self, entry: &Entry) -> io::Result<()> {
        self.record(Recorded::Assignment(entry.clone()))
    }

    async fn send_entry_update(&self, entry: &Entry) -> io::Result<()> {
        self.record(Recorded::Update(entry.clone()))
    }

    async fn flush(&self) -> io::Result<()> {
        self.record(Recorded::Flush)
    }
}

#[async_trait]
impl OutgoingTarget for RecordingSink {
    async fn send_assignment(&self, entry: &Entry) {
        let _ = self.record(Recorded::Assignment(entry.clone()));
    }

    async fn send_update(&self, entry: &Entry) {
        let _ = self.record(Recorded::Update(entry.clone()));
    }

    async fn flush(&self) {
        let _ = self.record(Recorded::Flush);
    }

    async fn ensure_alive(&self) {
        let _ = self.record(Recorded::KeepAlive);
    }
}

/// Builder for entries in arbitrary states.
#[derive(Debug, Clone)]
pub struct EntryBuilder {
    name: String,
    id: EntryId,
    sequence_number: SequenceNumber,
    value: Value,
    flags: EntryFlags,
}

impl EntryBuilder {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            id: EntryId::UNKNOWN,
            sequence_number: SequenceNumber::ZERO,
            value: value.into(),
            flags: EntryFlags::NONE,
        }
    }

    pub fn id(mut self, id: u16) -> Self {
        self.id = EntryId::new(id);
        self
    }

    pub fn seq(mut self, seq: u16) -> Self {
        self.sequence_number = SequenceNumber::new(seq);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.flags.insert(EntryFlags::PERSISTENT);
        self
    }

    pub fn build(self) -> Entry {
        Entry::remote(self.name, self.id, self.sequence_number, self.value).with_flags(self.flags)
    }
}

/// Intervals short enough for tests to converge quickly.
pub fn fast_client_config() -> ClientConfig {
    ClientConfig::default()
        .with_write_interval(Duration::from_millis(20))
        .with_keep_alive_interval(Duration::from_millis(50))
}

pub fn fast_server_config() -> ServerConfig {
    ServerConfig::default().with_write_interval(Duration::from_millis(20))
}

/// A server on the in-memory transport.
pub struct MemoryCluster {
    pub server: NetworkTableServer,
    pub factory: MemoryStreamFactory,
}

impl MemoryCluster {
    /// Start a server with [`fast_server_config`].
    pub async fn start() -> nettables::Result<Self> {
        Self::start_with(fast_server_config()).await
    }

    pub async fn start_with(config: ServerConfig) -> nettables::Result<Self> {
        let server = NetworkTableServer::new(config).await?;
        let (factory, listener) = memory::channel();
        server.start(Arc::new(listener))?;
        Ok(Self { server, factory })
    }

    /// A client wired to this server, not yet connected.
    pub fn client(&self) -> NetworkTableClient {
        NetworkTableClient::new(Arc::new(self.factory.clone()), &fast_client_config())
    }

    /// A client that has completed its handshake, or `None` on timeout.
    pub async fn connected_client(&self) -> Option<NetworkTableClient> {
        let client = self.client();
        client.reconnect().await;
        eventually(WAIT_TIMEOUT, || client.is_connected())
            .await
            .then_some(client)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// How long [`wait_for`] polls.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A condition that never held.
#[derive(Debug, Error)]
#[error("timed out waiting for {0}")]
pub struct TimedOut(pub String);

/// Like [`eventually`] with [`WAIT_TIMEOUT`], as an error naming `what`.
pub async fn wait_for(what: &str, condition: impl FnMut() -> bool) -> Result<(), TimedOut> {
    if eventually(WAIT_TIMEOUT, condition).await {
        Ok(())
    } else {
        Err(TimedOut(what.to_owned()))
    }
}

/// Fixtures for two clients of one server.
pub async fn two_client_fixture(
) -> Option<(MemoryCluster, NetworkTableClient, NetworkTableClient)> {
    let cluster = MemoryCluster::start().await.ok()?;
    let a = cluster.connected_client().await?;
    let b = cluster.connected_client().await?;
    Some((cluster, a, b))
}
