//! Middleware feeding the history engine, and store-side time travel.

use super::{HistoryEngine, META_ERROR, META_FAILED};
use crate::actions::{Action, META_SKIP_HISTORY};
use crate::error::Result;
use crate::middleware::{Middleware, Next, StoreApi};
use crate::state::State;
use crate::store::Store;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Records each dispatch with the states around it.
///
/// Failed dispatches are recorded with an unchanged state and
/// `failed: true` metadata, then the error is passed on.
pub struct HistoryMiddleware {
    engine: Arc<HistoryEngine>,
}

impl HistoryMiddleware {
    pub fn new(engine: Arc<HistoryEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<HistoryEngine> {
        &self.engine
    }
}

impl Middleware for HistoryMiddleware {
    fn name(&self) -> &str {
        "history"
    }

    fn handle(&self, api: &dyn StoreApi, action: Action, next: Next<'_>) -> Result<Action> {
        if action.meta_flag(META_SKIP_HISTORY) || !self.engine.is_recording() {
            return next.run(action);
        }

        let before = api.get_state();
        let started = Instant::now();
        let result = next.run(action.clone());
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(out) => {
                let after = api.get_state();
                self.engine
                    .record_action(out.clone(), before, after, duration_ms, BTreeMap::new());
                Ok(out)
            }
            Err(e) => {
                let mut metadata = BTreeMap::new();
                metadata.insert(META_FAILED.to_string(), Value::Bool(true));
                metadata.insert(META_ERROR.to_string(), Value::String(e.to_string()));
                self.engine
                    .record_action(action, before.clone(), before, duration_ms, metadata);
                Err(e)
            }
        }
    }
}

/// Travel the history to `index` and hydrate the store with that state.
///
/// Returns `None` without touching the store when the index is invalid.
pub fn travel_store(store: &Store, engine: &HistoryEngine, index: usize) -> Result<Option<State>> {
    match engine.travel_to(index) {
        Some(state) => {
            store.hydrate(state.clone())?;
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::creators;
    use crate::error::StoreError;
    use crate::middleware::middleware_fn;
    use crate::reducers::default_reducer;
    use crate::store::StoreConfig;
    use serde_json::json;

    fn store_with_history() -> (Store, Arc<HistoryEngine>) {
        let store = Store::new(default_reducer(), StoreConfig::default()).unwrap();
        let engine = Arc::new(HistoryEngine::default());
        store
            .add_middleware(Arc::new(HistoryMiddleware::new(Arc::clone(&engine))))
            .unwrap();
        (store, engine)
    }

    #[test]
    fn test_records_dispatches() {
        let (store, engine) = store_with_history();
        let before = store.get_state();
        let action = store.dispatch(creators::add_element("e1")).unwrap();

        let entries = engine.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action.id, action.id);
        assert_eq!(entries[0].state_before, before);
        assert_eq!(entries[0].state_after, store.get_state());
    }

    #[test]
    fn test_failed_dispatch_recorded_then_raised() {
        let store = Store::new(default_reducer(), StoreConfig::default()).unwrap();
        let engine = Arc::new(HistoryEngine::default());
        store
            .add_middleware(Arc::new(HistoryMiddleware::new(Arc::clone(&engine))))
            .unwrap();
        store
            .add_middleware(middleware_fn("refuse", |_api, action, next| {
                if action.action_type() == "BAD" {
                    return Err(StoreError::Reducer("bad action".into()));
                }
                next.run(action)
            }))
            .unwrap();

        let result = store.dispatch(creators::custom("BAD", json!(null)));
        assert!(matches!(result, Err(StoreError::Reducer(_))));

        let entry = engine.current_entry().unwrap();
        assert!(entry.failed());
        assert_eq!(entry.state_before, entry.state_after);
        assert!(entry.metadata[META_ERROR].as_str().unwrap().contains("bad action"));
    }

    #[test]
    fn test_travel_store_hydrates_without_recording() {
        let (store, engine) = store_with_history();
        for id in ["a", "b", "c"] {
            store.dispatch(creators::add_element(id)).unwrap();
        }

        let state = travel_store(&store, &engine, 0).unwrap().unwrap();
        assert_eq!(store.get_state(), state);
        assert_eq!(engine.len(), 3);

        assert!(travel_store(&store, &engine, 7).unwrap().is_none());
        assert_eq!(store.get_state(), state);
    }
}
