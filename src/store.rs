//! Main Store struct tying reducer, middleware and subscribers together.

use crate::actions::{creators, Action, META_SKIP_HISTORY, META_SKIP_PERSISTENCE};
use crate::error::{Result, StoreError};
use crate::middleware::{Middleware, Next, StoreApi};
use crate::reducers::Reducer;
use crate::state::State;
use crate::subscriptions::{
    ListenerRegistry, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager, Unsubscribe,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Actions kept in the in-memory audit log. 0 disables it.
    pub max_action_log: usize,

    /// Buffer size used by `watch` when the caller passes none.
    pub watcher_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_action_log: 1000,
            watcher_buffer_size: 1000,
        }
    }
}

/// Clears the in-flight flag when a dispatch leaves, including on error.
struct InFlight<'a>(&'a Cell<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Centralized state container.
///
/// `dispatch` is the only way to change the state. Dispatches are
/// serialized: other threads block until the current one finishes, and
/// dispatching from inside a dispatch (reducer, middleware, listener) on
/// the same thread fails with [`StoreError::Reentrancy`].
pub struct Store {
    config: StoreConfig,

    /// Root reducer, swappable at runtime.
    reducer: RwLock<Arc<dyn Reducer>>,

    /// Current state.
    state: RwLock<State>,

    /// Middleware in registration order.
    middleware: RwLock<Arc<[Arc<dyn Middleware>]>>,

    /// Serializes dispatch; the flag marks a dispatch in flight on the owning thread.
    dispatch_lock: ReentrantMutex<Cell<bool>>,

    /// Set by the first dispatch; freezes the middleware chain.
    has_dispatched: AtomicBool,

    /// Actions that reached the reducer.
    dispatch_count: AtomicU64,

    /// Bumped every time the state changes.
    revision: AtomicU64,

    listeners: ListenerRegistry,
    watchers: SubscriptionManager,

    /// Recently reduced actions, oldest first.
    action_log: Mutex<VecDeque<Action>>,
}

impl Store {
    /// Create a store whose initial state is the reducer applied to `@@INIT`.
    pub fn new(reducer: impl Reducer + 'static, config: StoreConfig) -> Result<Self> {
        Self::with_state(reducer, State::new(), config)
    }

    /// Create a store from a preloaded state. `@@INIT` is still reduced over it.
    pub fn with_state(
        reducer: impl Reducer + 'static,
        initial: State,
        config: StoreConfig,
    ) -> Result<Self> {
        let state = reducer.reduce(&initial, &creators::init())?;
        tracing::debug!(slices = state.len(), "store created");

        let empty: Vec<Arc<dyn Middleware>> = Vec::new();
        Ok(Self {
            config,
            reducer: RwLock::new(Arc::new(reducer)),
            state: RwLock::new(state),
            middleware: RwLock::new(empty.into()),
            dispatch_lock: ReentrantMutex::new(Cell::new(false)),
            has_dispatched: AtomicBool::new(false),
            dispatch_count: AtomicU64::new(0),
            revision: AtomicU64::new(0),
            listeners: ListenerRegistry::new(),
            watchers: SubscriptionManager::new(),
            action_log: Mutex::new(VecDeque::new()),
        })
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Dispatch ---

    /// Run `action` through the middleware chain and the root reducer.
    ///
    /// Returns the action as it left the chain (middleware may rewrite it).
    pub fn dispatch(&self, action: Action) -> Result<Action> {
        action.validate()?;

        let guard = self.dispatch_lock.lock();
        if guard.get() {
            return Err(StoreError::Reentrancy);
        }
        guard.set(true);
        let _in_flight = InFlight(&guard);

        self.has_dispatched.store(true, Ordering::SeqCst);

        let chain = Arc::clone(&*self.middleware.read());
        let action_id = action.id.clone();
        let action_type = action.action_type().to_string();

        let base = |action: Action| -> Result<Action> { self.base_dispatch(action) };
        let result = Next::new(&chain, self, &base).run(action);

        if let Err(ref e) = result {
            tracing::warn!(action = %action_type, id = %action_id, error = %e, "dispatch failed");
            self.watchers.broadcast(StoreEvent::ActionFailed {
                action_id,
                action_type,
                error: e.to_string(),
            });
        }
        result
    }

    /// Reduce, swap, notify, log.
    fn base_dispatch(&self, action: Action) -> Result<Action> {
        let reducer = Arc::clone(&*self.reducer.read());
        let previous = self.get_state();
        let next = reducer.reduce(&previous, &action)?;

        let changed = next != previous;
        let changed_slices = if changed {
            previous.changed_slices(&next)
        } else {
            Vec::new()
        };
        if changed {
            *self.state.write() = next.clone();
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        let count = self.dispatch_count.fetch_add(1, Ordering::SeqCst) + 1;

        if changed {
            for listener in self.listeners.snapshot() {
                listener(&next);
            }
            self.watchers.broadcast(StoreEvent::StateChanged {
                action_id: action.id.clone(),
                action_type: action.action_type().to_string(),
                changed_slices,
                dispatch_count: count,
            });
        }

        self.log_action(&action);
        Ok(action)
    }

    fn log_action(&self, action: &Action) {
        let max = self.config.max_action_log;
        if max == 0 {
            return;
        }
        let mut log = self.action_log.lock();
        log.push_back(action.clone());
        while log.len() > max {
            log.pop_front();
        }
    }

    /// Whether a dispatch is running on the calling thread.
    ///
    /// Never blocks: a dispatch in flight on another thread reports `false`.
    pub fn is_dispatching(&self) -> bool {
        self.dispatch_lock
            .try_lock()
            .map_or(false, |guard| guard.get())
    }

    // --- State access ---

    /// Current state. Never partially applied.
    pub fn get_state(&self) -> State {
        self.state.read().clone()
    }

    /// Derive a value from the current state.
    ///
    /// The selector sees a cloned state, so it may call back into the store.
    pub fn select<T>(&self, selector: impl FnOnce(&State) -> T) -> T {
        let state = self.get_state();
        selector(&state)
    }

    /// Read one slice.
    pub fn select_slice(&self, name: &str) -> Option<Arc<Value>> {
        self.state.read().slice(name)
    }

    /// Replace the whole state without recording or persisting it.
    pub fn hydrate(&self, state: State) -> Result<Action> {
        self.dispatch(
            creators::hydrate(state)
                .with_meta(META_SKIP_HISTORY, Value::Bool(true))
                .with_meta(META_SKIP_PERSISTENCE, Value::Bool(true)),
        )
    }

    // --- Subscriptions ---

    /// Call `listener` with the new state after every dispatch that changed it.
    pub fn subscribe(&self, listener: impl Fn(&State) + Send + Sync + 'static) -> Unsubscribe {
        self.listeners.add(Arc::new(listener))
    }

    /// Number of callback listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Open a channel-based watcher.
    pub fn watch(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.watchers.subscribe(config)
    }

    /// Open a watcher with default filter and the configured buffer size.
    pub fn watch_all(&self) -> SubscriptionHandle {
        self.watchers.subscribe(SubscriptionConfig {
            buffer_size: self.config.watcher_buffer_size,
            ..Default::default()
        })
    }

    /// Close a watcher.
    pub fn unwatch(&self, id: SubscriptionId) {
        self.watchers.unsubscribe(id);
    }

    // --- Composition ---

    /// Append a middleware. Only allowed before the first dispatch.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) -> Result<()> {
        if self.has_dispatched.load(Ordering::SeqCst) {
            return Err(StoreError::Lifecycle(format!(
                "cannot add middleware {} after the first dispatch",
                middleware.name()
            )));
        }
        let mut chain = self.middleware.write();
        let mut rebuilt = chain.to_vec();
        tracing::debug!(middleware = middleware.name(), position = rebuilt.len(), "middleware added");
        rebuilt.push(middleware);
        *chain = rebuilt.into();
        Ok(())
    }

    /// Number of registered middleware.
    pub fn middleware_count(&self) -> usize {
        self.middleware.read().len()
    }

    /// Swap the root reducer, then dispatch `@@REDUCER_REPLACED`.
    pub fn replace_reducer(&self, reducer: impl Reducer + 'static) -> Result<Action> {
        let guard = self.dispatch_lock.lock();
        if guard.get() {
            return Err(StoreError::Reentrancy);
        }
        *self.reducer.write() = Arc::new(reducer);
        tracing::info!("root reducer replaced");
        let result = self.dispatch(creators::reducer_replaced());
        drop(guard);
        result
    }

    // --- Introspection ---

    /// Recently reduced actions, oldest first.
    pub fn action_log(&self) -> Vec<Action> {
        self.action_log.lock().iter().cloned().collect()
    }

    /// Actions that reached the reducer so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count.load(Ordering::SeqCst)
    }

    /// Number of state changes so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

impl StoreApi for Store {
    fn get_state(&self) -> State {
        Store::get_state(self)
    }

    fn dispatch(&self, action: Action) -> Result<Action> {
        Store::dispatch(self, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::middleware_fn;
    use crate::reducers::default_reducer;
    use crate::subscriptions::SubscriptionFilter;
    use serde_json::json;
    use std::sync::Weak;
    use std::thread;
    use std::time::Duration;

    fn test_store() -> Store {
        Store::new(default_reducer(), StoreConfig::default()).unwrap()
    }

    fn all_ids(store: &Store) -> Vec<String> {
        store.select(|s| {
            serde_json::from_value(s.get("elements").unwrap()["allIds"].clone()).unwrap()
        })
    }

    #[test]
    fn test_initial_state_has_every_slice() {
        let store = test_store();
        let state = store.get_state();
        for name in ["document", "elements", "ui", "async"] {
            assert!(state.contains(name));
        }
        assert_eq!(store.dispatch_count(), 0);
    }

    #[test]
    fn test_dispatch_updates_state_and_log() {
        let store = test_store();
        store.dispatch(creators::add_element("e1")).unwrap();
        store.dispatch(creators::add_element("e2")).unwrap();

        assert_eq!(all_ids(&store), vec!["e1", "e2"]);
        assert_eq!(store.dispatch_count(), 2);
        let log = store.action_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action_type(), "ADD_ELEMENT");
    }

    #[test]
    fn test_action_log_is_bounded() {
        let store = Store::new(
            default_reducer(),
            StoreConfig {
                max_action_log: 3,
                ..Default::default()
            },
        )
        .unwrap();
        for i in 0..10 {
            store.dispatch(creators::add_element(format!("e{}", i))).unwrap();
        }
        let log = store.action_log();
        assert_eq!(log.len(), 3);
        assert_eq!(store.dispatch_count(), 10);
    }

    #[test]
    fn test_invalid_action_rejected() {
        let store = test_store();
        let mut action = creators::add_element("e1");
        action.id = String::new();
        assert!(matches!(store.dispatch(action), Err(StoreError::Validation(_))));

        assert!(matches!(
            store.dispatch(creators::custom("", json!(null))),
            Err(StoreError::Validation(_))
        ));
        assert_eq!(store.dispatch_count(), 0);
    }

    #[test]
    fn test_listeners_only_on_change_in_order() {
        let store = test_store();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c1 = Arc::clone(&calls);
        store.subscribe(move |_| c1.lock().push("first"));
        let c2 = Arc::clone(&calls);
        let second = store.subscribe(move |_| c2.lock().push("second"));

        store.dispatch(creators::add_element("e1")).unwrap();
        // Unknown custom action leaves every slice untouched
        store.dispatch(creators::custom("NOOP", json!(null))).unwrap();
        assert_eq!(*calls.lock(), vec!["first", "second"]);

        assert!(second.unsubscribe());
        assert!(!second.unsubscribe());
        store.dispatch(creators::add_element("e2")).unwrap();
        assert_eq!(*calls.lock(), vec!["first", "second", "first"]);
    }

    #[test]
    fn test_unchanged_dispatch_keeps_state_identity() {
        let store = test_store();
        let before = store.get_state();
        store.dispatch(creators::custom("NOOP", json!(null))).unwrap();
        assert!(before.ptr_eq(&store.get_state()));
        assert_eq!(store.revision(), 0);
        assert_eq!(store.dispatch_count(), 1);
    }

    #[test]
    fn test_middleware_dispatch_is_reentrancy_error() {
        let store = test_store();
        let observed = Arc::new(Mutex::new(None));
        let o = Arc::clone(&observed);
        store
            .add_middleware(middleware_fn("nested", move |api, action, next| {
                let nested = api.dispatch(creators::mark_saved());
                *o.lock() = Some(matches!(nested, Err(StoreError::Reentrancy)));
                next.run(action)
            }))
            .unwrap();

        store.dispatch(creators::add_element("e1")).unwrap();
        assert_eq!(*observed.lock(), Some(true));
        // Flag cleared afterwards
        store.dispatch(creators::add_element("e2")).unwrap();
        assert_eq!(all_ids(&store).len(), 2);
    }

    #[test]
    fn test_listener_dispatch_is_reentrancy_error() {
        let store = Arc::new(test_store());
        let weak: Weak<Store> = Arc::downgrade(&store);
        let observed = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&observed);
        store.subscribe(move |_| {
            if let Some(store) = weak.upgrade() {
                let nested = store.dispatch(creators::mark_saved());
                o.lock().push(matches!(nested, Err(StoreError::Reentrancy)));
            }
        });

        store.dispatch(creators::add_element("e1")).unwrap();
        assert_eq!(*observed.lock(), vec![true]);
    }

    #[test]
    fn test_reentrancy_flag_reset_after_error() {
        let store = test_store();
        store
            .add_middleware(middleware_fn("failing", |_api, action, next| {
                if action.action_type() == "FAIL" {
                    return Err(StoreError::Reducer("refused".into()));
                }
                next.run(action)
            }))
            .unwrap();

        let before = store.get_state();
        assert!(store.dispatch(creators::custom("FAIL", json!(null))).is_err());
        assert_eq!(store.get_state(), before);
        assert!(!store.is_dispatching());
        store.dispatch(creators::add_element("e1")).unwrap();
    }

    #[test]
    fn test_concurrent_dispatch_serializes() {
        let store = Arc::new(test_store());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .dispatch(creators::add_element(format!("t{}-{}", t, i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(all_ids(&store).len(), 200);
        assert_eq!(store.dispatch_count(), 200);
    }

    #[test]
    fn test_is_dispatching_does_not_block_other_threads() {
        let store = Arc::new(test_store());
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let seen_inside = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_inside);
        store
            .add_middleware(middleware_fn("gate", move |_api, action, next| {
                let _ = entered_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                next.run(action)
            }))
            .unwrap();

        let worker = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.dispatch(creators::add_element("e1")).unwrap();
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Another thread's dispatch is in flight; this thread is not dispatching
        assert!(!store.is_dispatching());
        release_tx.send(()).unwrap();
        drop(release_tx);
        worker.join().unwrap();

        let store_weak = Arc::downgrade(&store);
        store.subscribe(move |_| {
            if let Some(store) = store_weak.upgrade() {
                *seen.lock() = Some(store.is_dispatching());
            }
        });
        store.dispatch(creators::add_element("e2")).unwrap();
        assert_eq!(*seen_inside.lock(), Some(true));
        assert!(!store.is_dispatching());
    }

    #[test]
    fn test_selector_may_dispatch() {
        let store = test_store();
        let result = store.select(|state| {
            assert!(state.contains("elements"));
            store.dispatch(creators::add_element("from-selector"))
        });
        assert!(result.is_ok());
        assert_eq!(all_ids(&store), vec!["from-selector"]);
    }

    #[test]
    fn test_add_middleware_after_dispatch_fails() {
        let store = test_store();
        store
            .add_middleware(middleware_fn("a", |_api, action, next| next.run(action)))
            .unwrap();
        store.dispatch(creators::init()).unwrap();

        let result = store.add_middleware(middleware_fn("b", |_api, action, next| next.run(action)));
        assert!(matches!(result, Err(StoreError::Lifecycle(_))));
        assert_eq!(store.middleware_count(), 1);
    }

    #[test]
    fn test_middleware_can_rewrite_action() {
        let store = test_store();
        store
            .add_middleware(middleware_fn("tagger", |_api, action, next| {
                next.run(action.with_meta("tagged", json!(true)))
            }))
            .unwrap();

        let out = store.dispatch(creators::add_element("e1")).unwrap();
        assert!(out.meta_flag("tagged"));
        assert!(store.action_log()[0].meta_flag("tagged"));
    }

    #[test]
    fn test_replace_reducer() {
        let store = test_store();
        store.dispatch(creators::add_element("e1")).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let inner = default_reducer();
        store
            .replace_reducer(move |state: &State, action: &Action| {
                s.lock().push(action.action_type().to_string());
                inner.reduce(state, action)
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec!["@@REDUCER_REPLACED"]);
        assert_eq!(all_ids(&store), vec!["e1"]);
    }

    #[test]
    fn test_hydrate_replaces_state() {
        let store = test_store();
        store.dispatch(creators::add_element("e1")).unwrap();
        let saved = store.get_state();
        store.dispatch(creators::add_element("e2")).unwrap();

        let action = store.hydrate(saved.clone()).unwrap();
        assert!(action.meta_flag(META_SKIP_HISTORY));
        assert_eq!(store.get_state(), saved);
    }

    #[test]
    fn test_watcher_receives_changes_and_failures() {
        let store = test_store();
        let handle = store.watch(SubscriptionConfig {
            filter: SubscriptionFilter::all(),
            ..Default::default()
        });
        store
            .add_middleware(middleware_fn("failing", |_api, action, next| {
                if action.action_type() == "FAIL" {
                    return Err(StoreError::Reducer("refused".into()));
                }
                next.run(action)
            }))
            .unwrap();

        store.dispatch(creators::set_theme("dark")).unwrap();
        let _ = store.dispatch(creators::custom("FAIL", json!(null)));

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            StoreEvent::StateChanged {
                changed_slices,
                dispatch_count,
                ..
            } => {
                assert_eq!(changed_slices, vec!["ui"]);
                assert_eq!(dispatch_count, 1);
            }
            other => panic!("Expected StateChanged, got {:?}", other),
        }
        assert!(matches!(
            handle.recv_timeout(Duration::from_millis(100)).unwrap(),
            StoreEvent::ActionFailed { .. }
        ));
    }
}
