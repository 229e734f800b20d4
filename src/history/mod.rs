//! Time-travel history.
//!
//! [`HistoryEngine`] keeps an ordered log of `(action, state before, state
//! after)` entries per branch and a cursor into the current branch.
//! [`HistoryMiddleware`] feeds it from the dispatch pipeline. Entries hold
//! `State` values, which share slices with the store, so recording costs
//! little more than the slices an action actually changed.

mod branch;
mod engine;
mod export;
mod middleware;

pub use branch::{BranchInfo, HistoryBranch, MAIN_BRANCH};
pub use engine::HistoryEngine;
pub use export::HistoryExport;
pub use middleware::{travel_store, HistoryMiddleware};

use crate::actions::Action;
use crate::state::State;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata key holding the recorded action's type.
pub const META_ACTION_TYPE: &str = "action_type";

/// Metadata key set on entries for failed dispatches.
pub const META_FAILED: &str = "failed";

/// Metadata key holding a failed dispatch's error message.
pub const META_ERROR: &str = "error";

/// History configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Entries kept per branch before the oldest are pruned.
    pub max_history: usize,

    /// Allow branches. When disabled, recording after time travel
    /// discards the entries ahead of the cursor.
    pub enable_branching: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            enable_branching: false,
        }
    }
}

/// Recording mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    Recording,
    Paused,
    TimeTraveling,
}

/// One recorded dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: Timestamp,
    pub action: Action,
    pub state_before: State,
    pub state_after: State,
    pub duration_ms: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl HistoryEntry {
    /// Whether this entry records a failed dispatch.
    pub fn failed(&self) -> bool {
        matches!(self.metadata.get(META_FAILED), Some(Value::Bool(true)))
    }

    /// Bytes this entry adds on top of states already held elsewhere:
    /// the action plus the slices it changed.
    pub fn estimated_size(&self) -> usize {
        let action = serde_json::to_vec(&self.action)
            .map(|v| v.len())
            .unwrap_or(0);
        let changed: usize = self
            .state_before
            .changed_slices(&self.state_after)
            .iter()
            .filter_map(|name| self.state_after.get(name))
            .map(|v| serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0))
            .sum();
        action + changed
    }
}

/// Running history statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    /// Entries recorded since creation or the last clear.
    pub total_actions: u64,
    /// Mean dispatch duration over recorded entries.
    pub average_duration_ms: f64,
    /// Estimated bytes held by live entries.
    pub memory_bytes: usize,
    /// Entries removed by pruning or truncation.
    pub pruned: u64,
}
