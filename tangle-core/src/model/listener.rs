//! Listener types for model change notifications.
//!
//! A Listener is any observer of committed graph changes: runtime mirrors,
//! editors, persistence layers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Unique identifier for a listener within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// A registry of callbacks notified with events of type `E`.
///
/// Clones share the same registry, so a snapshot of a model keeps notifying
/// the listeners of the original.
pub struct Listeners<E> {
    next_id: Arc<AtomicU64>,
    /// Boxed so different observers can carry different captured state.
    entries: Arc<RwLock<Vec<(ListenerId, Callback<E>)>>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(0)),
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a callback; returns its id for later removal.
    pub fn subscribe<F>(&self, notify: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, Box::new(notify)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Notify every listener, in registration order.
    pub fn emit(&self, event: &E) {
        for (_, notify) in self.entries.read().iter() {
            notify(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            next_id: Arc::clone(&self.next_id),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}
