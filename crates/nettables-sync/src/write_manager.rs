//! Periodic flush of pending entry changes.
//!
//! The write manager sits between a store and whatever sends for it. It
//! receives change hooks from the store, remembers which entries need an
//! assignment or an update, and on every tick pulls the current state of those
//! entries and hands them to its [`OutgoingTarget`].

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use nettables_core::Entry;
use nettables_store::{EntrySource, IncomingReceiver, OutgoingReceiver};

/// Where the write manager sends.
///
/// Implementations handle their own failures: a client adapter reconnects, a
/// server connection list drops the broken connection.
#[async_trait]
pub trait OutgoingTarget: Send + Sync {
    async fn send_assignment(&self, entry: &Entry);

    async fn send_update(&self, entry: &Entry);

    async fn flush(&self);

    /// Keep the link alive, or bring it back if it is down.
    async fn ensure_alive(&self);
}

/// Write manager timing.
#[derive(Debug, Clone)]
pub struct WriteManagerConfig {
    /// Period between flushes.
    pub write_interval: Duration,
    /// Period between `ensure_alive` calls. `None` disables them.
    pub keep_alive_interval: Option<Duration>,
}

impl Default for WriteManagerConfig {
    fn default() -> Self {
        Self {
            write_interval: Duration::from_millis(1000),
            keep_alive_interval: Some(Duration::from_millis(1000)),
        }
    }
}

/// Insertion-ordered set of entry names.
#[derive(Debug, Default)]
struct NameQueue {
    order: Vec<String>,
    members: HashSet<String>,
}

impl NameQueue {
    fn push(&mut self, name: &str) {
        if self.members.insert(name.to_owned()) {
            self.order.push(name.to_owned());
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    fn take(&mut self) -> Vec<String> {
        self.members.clear();
        std::mem::take(&mut self.order)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Default)]
struct Pending {
    assignments: NameQueue,
    updates: NameQueue,
}

/// Batches entry changes and flushes them on a fixed period.
pub struct WriteManager {
    source: Arc<dyn EntrySource>,
    target: Arc<dyn OutgoingTarget>,
    config: WriteManagerConfig,
    pending: Mutex<Pending>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WriteManager {
    pub fn new(
        source: Arc<dyn EntrySource>,
        target: Arc<dyn OutgoingTarget>,
        config: WriteManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            target,
            config,
            pending: Mutex::new(Pending::default()),
            task: Mutex::new(None),
        })
    }

    /// Start the periodic task. Does nothing if it is already running.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let this = Arc::downgrade(self);
        let write_interval = self.config.write_interval;
        let keep_alive = self.config.keep_alive_interval;
        *task = Some(tokio::spawn(run(this, write_interval, keep_alive)));
        debug!(?write_interval, ?keep_alive, "write manager started");
    }

    /// Stop the periodic task. Pending changes stay queued.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("write manager stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Number of queued assignments and updates.
    pub fn pending(&self) -> (usize, usize) {
        let pending = self.pending.lock();
        (pending.assignments.len(), pending.updates.len())
    }

    /// Send everything queued, then flush the target once.
    ///
    /// Returns the number of messages sent.
    pub async fn flush_pending(&self) -> usize {
        let (assignments, updates) = {
            let mut pending = self.pending.lock();
            (pending.assignments.take(), pending.updates.take())
        };

        let mut sent = 0;
        for name in &assignments {
            if let Some(entry) = self.checkout_dirty(name) {
                self.target.send_assignment(&entry).await;
                sent += 1;
            }
        }
        for name in &updates {
            let Some(entry) = self.checkout_dirty(name) else {
                continue;
            };
            if entry.id().is_known() {
                self.target.send_update(&entry).await;
            } else {
                self.target.send_assignment(&entry).await;
            }
            sent += 1;
        }
        if sent > 0 {
            self.target.flush().await;
            trace!(sent, "flushed pending entries");
        }
        sent
    }

    /// The entry under `name`, unless its latest change was already sent.
    fn checkout_dirty(&self, name: &str) -> Option<Entry> {
        self.source.checkout(name).filter(Entry::is_dirty)
    }

    fn queue_assignment(&self, entry: &Entry) {
        self.pending.lock().assignments.push(entry.name());
    }

    fn queue_update(&self, entry: &Entry) {
        let mut pending = self.pending.lock();
        if !pending.assignments.contains(entry.name()) {
            pending.updates.push(entry.name());
        }
    }
}

async fn run(this: Weak<WriteManager>, write_interval: Duration, keep_alive: Option<Duration>) {
    let mut ticker = tokio::time::interval(write_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_keep_alive = Instant::now();

    loop {
        ticker.tick().await;
        let Some(manager) = this.upgrade() else {
            return;
        };
        manager.flush_pending().await;
        if let Some(period) = keep_alive {
            if last_keep_alive.elapsed() >= period {
                last_keep_alive = Instant::now();
                manager.target.ensure_alive().await;
            }
        }
    }
}

impl OutgoingReceiver for WriteManager {
    fn offer_outgoing_assignment(&self, entry: &Entry) {
        self.queue_assignment(entry);
    }

    fn offer_outgoing_update(&self, entry: &Entry) {
        self.queue_update(entry);
    }
}

/// On a server, changes received from one client are rebroadcast to all.
impl IncomingReceiver for WriteManager {
    fn offer_incoming_assignment(&self, entry: &Entry) {
        self.queue_assignment(entry);
    }

    fn offer_incoming_update(&self, entry: &Entry) {
        self.queue_update(entry);
    }
}

impl Drop for WriteManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for WriteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteManager")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
