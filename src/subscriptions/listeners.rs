//! Ordered callback listeners.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback invoked with the new state after a changing dispatch.
pub type Listener = Arc<dyn Fn(&State) + Send + Sync>;

type ListenerList = RwLock<Vec<(u64, Listener)>>;

/// Listeners in subscription order.
pub struct ListenerRegistry {
    listeners: Arc<ListenerList>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a listener; the returned handle removes it.
    pub fn add(&self, listener: Listener) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, listener));
        Unsubscribe {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Current listeners, copied so callbacks can (un)subscribe while being notified.
    pub fn snapshot(&self) -> Vec<Listener> {
        self.listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its listener. Calling it more than once is harmless.
#[derive(Clone)]
pub struct Unsubscribe {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Unsubscribe {
    /// Remove the listener. Returns true if it was still registered.
    pub fn unsubscribe(&self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut listeners = listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_listeners_keep_order_and_unsubscribe_is_idempotent() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c1 = Arc::clone(&calls);
        let first = registry.add(Arc::new(move |_| c1.lock().push(1)));
        let c2 = Arc::clone(&calls);
        let _second = registry.add(Arc::new(move |_| c2.lock().push(2)));

        for listener in registry.snapshot() {
            listener(&State::new());
        }
        assert_eq!(*calls.lock(), vec![1, 2]);

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert_eq!(registry.len(), 1);
    }
}
