//! Middleware handing post-dispatch states to the persistence manager.

use super::{PersistenceManager, SaveMetadata};
use crate::actions::{Action, META_SKIP_PERSISTENCE};
use crate::error::Result;
use crate::middleware::{Middleware, Next, StoreApi};
use std::sync::Arc;

/// After the rest of the chain succeeds, requests a save of the new state
/// unless the action opts out with `meta.skip_persistence` or its type is
/// listed in `skip_action_types`. Failed dispatches are never saved.
pub struct PersistenceMiddleware {
    manager: Arc<PersistenceManager>,
}

impl PersistenceMiddleware {
    pub fn new(manager: Arc<PersistenceManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<PersistenceManager> {
        &self.manager
    }

    fn eligible(&self, action: &Action) -> bool {
        !action.meta_flag(META_SKIP_PERSISTENCE) && !self.manager.skips(action.action_type())
    }
}

impl Middleware for PersistenceMiddleware {
    fn name(&self) -> &str {
        "persistence"
    }

    fn handle(&self, api: &dyn StoreApi, action: Action, next: Next<'_>) -> Result<Action> {
        let out = next.run(action)?;
        if self.eligible(&out) {
            self.manager
                .request_save(api.get_state(), SaveMetadata::for_action(out.action_type()));
        } else {
            tracing::trace!(action_type = out.action_type(), "persistence skipped");
        }
        Ok(out)
    }
}
