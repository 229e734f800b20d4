//! Middleware that logs every dispatch through `tracing`.

use super::{Middleware, Next, StoreApi};
use crate::actions::Action;
use crate::error::Result;
use std::time::Instant;
use tracing::{debug, warn};

/// Logs action type, duration and whether state changed.
#[derive(Clone, Debug, Default)]
pub struct LoggingMiddleware {
    /// Also log the resulting state (expensive for large states).
    pub log_state: bool,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, log_state: bool) -> Self {
        self.log_state = log_state;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle(&self, api: &dyn StoreApi, action: Action, next: Next<'_>) -> Result<Action> {
        let before = api.get_state();
        let action_type = action.action_type().to_string();
        let action_id = action.id.clone();
        let started = Instant::now();

        match next.run(action) {
            Ok(action) => {
                let after = api.get_state();
                let changed = before != after;
                debug!(
                    action_type = %action_type,
                    action_id = %action_id,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    changed,
                    "dispatched"
                );
                if self.log_state {
                    debug!(state = ?after, "state after {}", action_type);
                }
                Ok(action)
            }
            Err(e) => {
                warn!(
                    action_type = %action_type,
                    action_id = %action_id,
                    error = %e,
                    "dispatch failed"
                );
                Err(e)
            }
        }
    }
}
