//! Counts dispatched actions toward the incremental snapshot threshold.

use super::SnapshotManager;
use crate::actions::Action;
use crate::error::Result;
use crate::middleware::{Middleware, Next, StoreApi};
use std::sync::Arc;

pub struct SnapshotMiddleware {
    manager: Arc<SnapshotManager>,
}

impl SnapshotMiddleware {
    pub fn new(manager: Arc<SnapshotManager>) -> Self {
        Self { manager }
    }
}

impl Middleware for SnapshotMiddleware {
    fn name(&self) -> &str {
        "snapshots"
    }

    fn handle(&self, _api: &dyn StoreApi, action: Action, next: Next<'_>) -> Result<Action> {
        let out = next.run(action)?;
        if !out.is_system() {
            self.manager.record_action();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::creators;
    use crate::reducers::default_reducer;
    use crate::snapshots::SnapshotConfig;
    use crate::store::{Store, StoreConfig};

    #[test]
    fn test_counts_successful_non_system_actions() {
        let manager = Arc::new(SnapshotManager::new(SnapshotConfig::default()).unwrap());
        let store = Store::new(default_reducer(), StoreConfig::default()).unwrap();
        store
            .add_middleware(Arc::new(SnapshotMiddleware::new(Arc::clone(&manager))))
            .unwrap();

        store.dispatch(creators::add_element("a")).unwrap();
        store.dispatch(creators::set_zoom(2.0)).unwrap();
        store.dispatch(creators::reset()).unwrap();
        assert_eq!(manager.actions_since_last(), 2);

        manager
            .create_snapshot(&store.get_state(), None, None, None)
            .unwrap();
        assert_eq!(manager.actions_since_last(), 0);
    }
}
