//! Synchronous observer callbacks.

use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nettables_core::Value;
use parking_lot::RwLock;

/// Handle returned when a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Why an entry listener is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NotifyFlags(u8);

impl NotifyFlags {
    pub const NONE: Self = Self(0);
    /// Replay of an existing entry at registration time.
    pub const IMMEDIATE: Self = Self(0x01);
    /// Change made by this node.
    pub const LOCAL: Self = Self(0x02);
    /// Entry was created.
    pub const NEW: Self = Self(0x04);
    /// Entry value changed.
    pub const UPDATE: Self = Self(0x10);
    /// Entry flags changed.
    pub const FLAGS: Self = Self(0x20);

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: NotifyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NotifyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Payload delivered to entry listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryNotification {
    pub name: String,
    pub value: Value,
    pub flags: NotifyFlags,
}

/// Client connection boundary events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The handshake completed.
    Connected,
    /// A synchronized connection was lost or closed.
    Disconnected,
}

/// Shared entry listener callback.
pub type EntryListener = Arc<dyn Fn(&EntryNotification) + Send + Sync>;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Registry of callbacks for one event type.
///
/// `fire` copies the registration list before calling out, so a callback may
/// add or remove listeners without deadlocking.
pub struct ListenerManager<E> {
    next_handle: AtomicU64,
    listeners: RwLock<Vec<(ListenerHandle, Callback<E>)>>,
}

impl<E> ListenerManager<E> {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerHandle {
        self.add_arc(Arc::new(listener))
    }

    pub fn add_arc(&self, listener: Callback<E>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((handle, listener));
        handle
    }

    /// Returns `false` if the handle was not registered.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    pub fn fire(&self, event: &E) {
        let listeners: Vec<Callback<E>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for ListenerManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for ListenerManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerManager")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fire_and_remove() {
        let manager = ListenerManager::<ConnectionEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = manager.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        manager.fire(&ConnectionEvent::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(manager.remove(handle));
        assert!(!manager.remove(handle));
        manager.fire(&ConnectionEvent::Disconnected);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_listener_can_register_from_callback() {
        let manager = Arc::new(ListenerManager::<ConnectionEvent>::new());
        let inner = Arc::clone(&manager);
        manager.add(move |_| {
            inner.add(|_| {});
        });
        manager.fire(&ConnectionEvent::Connected);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_notify_flags() {
        let flags = NotifyFlags::LOCAL | NotifyFlags::NEW;
        assert!(flags.contains(NotifyFlags::LOCAL));
        assert!(flags.contains(NotifyFlags::NEW));
        assert!(!flags.contains(NotifyFlags::UPDATE));
        assert_eq!(flags.bits(), 0x06);
    }
}
