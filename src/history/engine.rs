//! History engine: recording, navigation and branching.

use super::branch::{BranchInfo, BranchSet, HistoryBranch, MAIN_BRANCH};
use super::export::HistoryExport;
use super::{HistoryConfig, HistoryEntry, HistoryMode, HistoryStats, META_ACTION_TYPE};
use crate::actions::Action;
use crate::error::{Result, StoreError};
use crate::state::State;
use crate::types::{new_id, Timestamp};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

struct HistoryInner {
    branches: BranchSet,
    current_branch: String,
    /// Index of the entry whose `state_after` is current. None before the first entry.
    cursor: Option<usize>,
    mode: HistoryMode,
    stats: HistoryStats,
}

impl HistoryInner {
    fn new() -> Self {
        Self {
            branches: BranchSet::new(),
            current_branch: MAIN_BRANCH.to_string(),
            cursor: None,
            mode: HistoryMode::Recording,
            stats: HistoryStats::default(),
        }
    }

    fn current(&self) -> Result<&HistoryBranch> {
        self.branches
            .get(&self.current_branch)
            .ok_or_else(|| StoreError::BranchNotFound(self.current_branch.clone()))
    }

    fn current_mut(&mut self) -> Result<&mut HistoryBranch> {
        let id = self.current_branch.clone();
        self.branches
            .get_mut(&id)
            .ok_or(StoreError::BranchNotFound(id))
    }

    fn forget(&mut self, removed: &[HistoryEntry]) {
        let bytes: usize = removed.iter().map(HistoryEntry::estimated_size).sum();
        self.stats.memory_bytes = self.stats.memory_bytes.saturating_sub(bytes);
        self.stats.pruned += removed.len() as u64;
    }
}

/// Ordered, optionally branching log of dispatches.
pub struct HistoryEngine {
    config: HistoryConfig,
    inner: RwLock<HistoryInner>,
}

impl HistoryEngine {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(HistoryInner::new()),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    // --- Recording ---

    /// Append an entry for a dispatch. Does nothing unless recording.
    ///
    /// Returns the new entry's id when one was recorded.
    pub fn record_action(
        &self,
        action: Action,
        state_before: State,
        state_after: State,
        duration_ms: f64,
        metadata: BTreeMap<String, Value>,
    ) -> Option<String> {
        let mut inner = self.inner.write();
        if inner.mode != HistoryMode::Recording {
            return None;
        }

        let mut metadata = metadata;
        metadata.insert(
            META_ACTION_TYPE.to_string(),
            Value::String(action.action_type().to_string()),
        );
        let entry = HistoryEntry {
            id: new_id(),
            timestamp: Timestamp::now(),
            action,
            state_before,
            state_after,
            duration_ms,
            metadata,
        };
        let entry_id = entry.id.clone();
        let entry_size = entry.estimated_size();

        let branching = self.config.enable_branching;
        let max_history = self.config.max_history;
        let cursor = inner.cursor;

        let branch = inner.current_mut().ok()?;

        // Linear history: recording after travelling back drops the redo tail.
        let mut truncated = Vec::new();
        if !branching {
            let keep = cursor.map_or(0, |c| c + 1);
            if keep < branch.entries.len() {
                truncated = branch.entries.split_off(keep);
            }
        }

        branch.entries.push(entry);

        let mut pruned = Vec::new();
        if max_history > 0 && branch.entries.len() > max_history {
            let excess = branch.entries.len() - max_history;
            pruned = branch.entries.drain(..excess).collect();
        }
        let len = branch.entries.len();

        inner.forget(&truncated);
        inner.forget(&pruned);
        if !truncated.is_empty() {
            tracing::debug!(discarded = truncated.len(), "redo history discarded");
        }

        inner.cursor = Some(len - 1);

        let stats = &mut inner.stats;
        let n = stats.total_actions as f64;
        stats.average_duration_ms = (stats.average_duration_ms * n + duration_ms) / (n + 1.0);
        stats.total_actions += 1;
        stats.memory_bytes += entry_size;

        Some(entry_id)
    }

    /// Stop recording.
    pub fn pause(&self) {
        self.inner.write().mode = HistoryMode::Paused;
    }

    /// Go back to recording. The cursor stays where it is.
    pub fn resume(&self) {
        self.inner.write().mode = HistoryMode::Recording;
    }

    pub fn mode(&self) -> HistoryMode {
        self.inner.read().mode
    }

    pub fn is_recording(&self) -> bool {
        self.mode() == HistoryMode::Recording
    }

    /// Drop every entry and branch, back to an empty main branch.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let mode = inner.mode;
        *inner = HistoryInner::new();
        inner.mode = mode;
    }

    // --- Navigation ---

    /// Move the cursor to `index` on the current branch and return that entry's
    /// resulting state. Out of range leaves everything untouched.
    pub fn travel_to(&self, index: usize) -> Option<State> {
        let mut inner = self.inner.write();
        let state = inner.current().ok()?.entries.get(index)?.state_after.clone();
        inner.cursor = Some(index);
        inner.mode = HistoryMode::TimeTraveling;
        Some(state)
    }

    pub fn travel_backward(&self, steps: usize) -> Option<State> {
        let target = self.current_index()?.checked_sub(steps)?;
        self.travel_to(target)
    }

    pub fn travel_forward(&self, steps: usize) -> Option<State> {
        let target = self.current_index()?.checked_add(steps)?;
        self.travel_to(target)
    }

    /// Travel to an entry of the current branch by id.
    pub fn travel_to_entry(&self, entry_id: &str) -> Option<State> {
        let index = self.inner.read().current().ok()?.position(entry_id)?;
        self.travel_to(index)
    }

    /// Find the entry recorded for an action, searching every branch.
    pub fn find_entry_by_action(&self, action_id: &str) -> Option<HistoryEntry> {
        let inner = self.inner.read();
        let found = inner
            .branches
            .iter()
            .flat_map(|b| b.entries.iter())
            .find(|e| e.action.id == action_id)
            .cloned();
        found
    }

    /// Actions from `index` to the end of the current branch, in order.
    pub fn replay_from(&self, index: usize) -> Vec<Action> {
        let inner = self.inner.read();
        match inner.current() {
            Ok(branch) if index < branch.entries.len() => branch.entries[index..]
                .iter()
                .map(|e| e.action.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.read().cursor
    }

    pub fn current_entry(&self) -> Option<HistoryEntry> {
        let inner = self.inner.read();
        let cursor = inner.cursor?;
        inner.current().ok()?.entries.get(cursor).cloned()
    }

    pub fn can_travel_backward(&self) -> bool {
        self.current_index().is_some_and(|c| c > 0)
    }

    pub fn can_travel_forward(&self) -> bool {
        let inner = self.inner.read();
        let len = inner.current().map(|b| b.entries.len()).unwrap_or(0);
        inner.cursor.is_some_and(|c| c + 1 < len)
    }

    /// Entries of the current branch.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner
            .read()
            .current()
            .map(|b| b.entries.clone())
            .unwrap_or_default()
    }

    /// Number of entries on the current branch.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .current()
            .map(|b| b.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> HistoryStats {
        self.inner.read().stats.clone()
    }

    // --- Branches ---

    /// Create a branch diverging from `from_entry_id`, or from the current
    /// entry when none is given. Does not switch to it.
    pub fn create_branch(&self, name: &str, from_entry_id: Option<&str>) -> Result<String> {
        if !self.config.enable_branching {
            return Err(StoreError::InvalidOperation(
                "branching is disabled".to_string(),
            ));
        }
        let mut inner = self.inner.write();

        let parent = match from_entry_id {
            Some(entry_id) => {
                if inner.branches.locate(entry_id).is_none() {
                    return Err(StoreError::EntryNotFound(entry_id.to_string()));
                }
                Some(entry_id.to_string())
            }
            None => {
                let cursor = inner.cursor;
                let branch = inner.current()?;
                cursor.and_then(|c| branch.entries.get(c)).map(|e| e.id.clone())
            }
        };

        let id = inner.branches.create(name, parent)?;
        tracing::debug!(branch = %name, id = %id, "history branch created");
        Ok(id)
    }

    /// Make a branch current, by id or name. The cursor moves to its last
    /// entry. Returns the branch head state: its last entry's state, or the
    /// state of the entry it diverged from while it is still empty.
    pub fn switch_branch(&self, id_or_name: &str) -> Result<Option<State>> {
        let mut inner = self.inner.write();
        let id = inner.branches.resolve(id_or_name)?;

        let branch = inner
            .branches
            .get(&id)
            .ok_or_else(|| StoreError::BranchNotFound(id.clone()))?;
        let cursor = branch.entries.len().checked_sub(1);
        let head = match branch.entries.last() {
            Some(entry) => Some(entry.state_after.clone()),
            None => branch.parent_entry_id.as_deref().and_then(|parent| {
                let (owner, index) = inner.branches.locate(parent)?;
                inner
                    .branches
                    .get(owner)
                    .map(|b| b.entries[index].state_after.clone())
            }),
        };

        inner.current_branch = id;
        inner.cursor = cursor;
        Ok(head)
    }

    /// Delete a branch other than main or the current one.
    pub fn delete_branch(&self, id_or_name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let id = inner.branches.resolve(id_or_name)?;
        if id == MAIN_BRANCH {
            return Err(StoreError::InvalidOperation(
                "cannot delete the main branch".to_string(),
            ));
        }
        if id == inner.current_branch {
            return Err(StoreError::InvalidOperation(
                "cannot delete the current branch".to_string(),
            ));
        }
        if let Some(branch) = inner.branches.remove(&id) {
            let bytes: usize = branch.entries.iter().map(HistoryEntry::estimated_size).sum();
            inner.stats.memory_bytes = inner.stats.memory_bytes.saturating_sub(bytes);
        }
        Ok(())
    }

    pub fn list_branches(&self) -> Vec<BranchInfo> {
        let inner = self.inner.read();
        inner
            .branches
            .iter()
            .map(|b| BranchInfo {
                id: b.id.clone(),
                name: b.name.clone(),
                parent_entry_id: b.parent_entry_id.clone(),
                created_at: b.created_at,
                entry_count: b.entries.len(),
                is_current: b.id == inner.current_branch,
            })
            .collect()
    }

    /// Id of the current branch.
    pub fn current_branch(&self) -> String {
        self.inner.read().current_branch.clone()
    }

    /// Entry count of a branch, by id or name.
    pub fn branch_len(&self, id_or_name: &str) -> Result<usize> {
        let inner = self.inner.read();
        let id = inner.branches.resolve(id_or_name)?;
        Ok(inner.branches.get(&id).map(|b| b.entries.len()).unwrap_or(0))
    }

    // --- Export ---

    /// Every branch, the cursor and the stats.
    pub fn export(&self) -> HistoryExport {
        let inner = self.inner.read();
        HistoryExport {
            branches: inner.branches.to_map(),
            current_branch: inner.current_branch.clone(),
            current_index: inner.cursor,
            stats: inner.stats.clone(),
            exported_at: Timestamp::now(),
        }
    }

    /// Replace the whole history with an export. Fails without changes if
    /// the export is inconsistent.
    pub fn import(&self, export: HistoryExport) -> Result<()> {
        let branches = BranchSet::from_branches(export.branches)?;
        let current = branches
            .get(&export.current_branch)
            .ok_or_else(|| StoreError::BranchNotFound(export.current_branch.clone()))?;
        if let Some(index) = export.current_index {
            if index >= current.entries.len() {
                return Err(StoreError::InvalidFormat(format!(
                    "cursor {} out of range for branch with {} entries",
                    index,
                    current.entries.len()
                )));
            }
        }

        let mut inner = self.inner.write();
        inner.branches = branches;
        inner.current_branch = export.current_branch;
        inner.cursor = export.current_index;
        inner.stats = export.stats;
        Ok(())
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.export())?)
    }

    pub fn import_json(&self, json: &str) -> Result<()> {
        self.import(serde_json::from_str(json)?)
    }
}

impl Default for HistoryEngine {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::creators;
    use serde_json::json;

    fn counter(n: i64) -> State {
        State::new().with_slice("count", json!(n))
    }

    fn record_n(engine: &HistoryEngine, n: i64) {
        for i in 0..n {
            engine.record_action(
                creators::custom("INCREMENT", json!(null)),
                counter(i),
                counter(i + 1),
                1.0,
                BTreeMap::new(),
            );
        }
    }

    fn branching() -> HistoryEngine {
        HistoryEngine::new(HistoryConfig {
            enable_branching: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_record_and_stats() {
        let engine = HistoryEngine::default();
        engine.record_action(
            creators::custom("A", json!(null)),
            counter(0),
            counter(1),
            2.0,
            BTreeMap::new(),
        );
        engine.record_action(
            creators::custom("B", json!(null)),
            counter(1),
            counter(2),
            4.0,
            BTreeMap::new(),
        );

        let stats = engine.stats();
        assert_eq!(stats.total_actions, 2);
        assert!((stats.average_duration_ms - 3.0).abs() < f64::EPSILON);
        assert!(stats.memory_bytes > 0);
        assert_eq!(engine.current_index(), Some(1));
        assert_eq!(engine.entries()[1].metadata[META_ACTION_TYPE], json!("B"));
    }

    #[test]
    fn test_backward_forward_roundtrip() {
        let engine = HistoryEngine::default();
        record_n(&engine, 5);
        let at_tail = engine.current_entry().unwrap().state_after;

        for k in 0..5 {
            engine.travel_to(4).unwrap();
            assert!(engine.travel_backward(k).is_some());
            assert_eq!(engine.travel_forward(k).unwrap(), at_tail);
        }
    }

    #[test]
    fn test_invalid_travel_is_noop() {
        let engine = HistoryEngine::default();
        record_n(&engine, 3);
        assert!(engine.travel_to(3).is_none());
        assert!(engine.travel_backward(10).is_none());
        assert_eq!(engine.current_index(), Some(2));
        assert_eq!(engine.mode(), HistoryMode::Recording);
        assert_eq!(engine.len(), 3);
    }

    #[test]
    fn test_no_recording_while_travelling_or_paused() {
        let engine = HistoryEngine::default();
        record_n(&engine, 3);

        engine.travel_to(0).unwrap();
        assert_eq!(engine.mode(), HistoryMode::TimeTraveling);
        record_n(&engine, 1);
        assert_eq!(engine.len(), 3);

        engine.resume();
        engine.pause();
        record_n(&engine, 1);
        assert_eq!(engine.len(), 3);
    }

    #[test]
    fn test_linear_mode_truncates_redo_tail() {
        let engine = HistoryEngine::default();
        record_n(&engine, 5);
        engine.travel_to(1).unwrap();
        engine.resume();
        record_n(&engine, 1);

        assert_eq!(engine.len(), 3);
        assert_eq!(engine.current_index(), Some(2));
        assert_eq!(engine.stats().pruned, 3);
    }

    #[test]
    fn test_branching_mode_keeps_forward_entries() {
        let engine = branching();
        record_n(&engine, 5);
        engine.travel_to(1).unwrap();
        engine.resume();
        record_n(&engine, 1);
        assert_eq!(engine.len(), 6);
        assert_eq!(engine.current_index(), Some(5));
    }

    #[test]
    fn test_pruning_shifts_cursor() {
        let engine = HistoryEngine::new(HistoryConfig {
            max_history: 3,
            ..Default::default()
        });
        record_n(&engine, 10);

        assert_eq!(engine.len(), 3);
        assert_eq!(engine.current_index(), Some(2));
        assert_eq!(engine.entries()[0].state_after, counter(8));
        assert_eq!(engine.stats().pruned, 7);
    }

    #[test]
    fn test_replay_and_lookup() {
        let engine = HistoryEngine::default();
        let actions: Vec<Action> = (0..4)
            .map(|i| creators::custom(format!("A{}", i), json!(null)))
            .collect();
        for (i, action) in actions.iter().enumerate() {
            engine.record_action(
                action.clone(),
                counter(i as i64),
                counter(i as i64 + 1),
                0.5,
                BTreeMap::new(),
            );
        }

        let replay = engine.replay_from(2);
        assert_eq!(replay, actions[2..].to_vec());
        assert!(engine.replay_from(9).is_empty());

        let entry = engine.find_entry_by_action(&actions[1].id).unwrap();
        assert_eq!(entry.state_after, counter(2));
        assert_eq!(engine.travel_to_entry(&entry.id).unwrap(), counter(2));
        assert_eq!(engine.current_index(), Some(1));
    }

    #[test]
    fn test_branch_scenario() {
        let engine = branching();
        record_n(&engine, 2);

        let b1 = engine.create_branch("b1", None).unwrap();
        let head = engine.switch_branch("b1").unwrap();
        assert_eq!(head, Some(counter(2)));
        assert_eq!(engine.current_branch(), b1);

        record_n(&engine, 1);
        assert_eq!(engine.branch_len(MAIN_BRANCH).unwrap(), 2);
        assert_eq!(engine.branch_len("b1").unwrap(), 1);

        engine.switch_branch(MAIN_BRANCH).unwrap();
        assert_eq!(engine.current_index(), Some(1));
    }

    #[test]
    fn test_branch_errors() {
        let linear = HistoryEngine::default();
        assert!(matches!(
            linear.create_branch("b", None),
            Err(StoreError::InvalidOperation(_))
        ));

        let engine = branching();
        assert!(matches!(
            engine.create_branch("b", Some("nope")),
            Err(StoreError::EntryNotFound(_))
        ));
        assert!(matches!(
            engine.switch_branch("nope"),
            Err(StoreError::BranchNotFound(_))
        ));
        assert!(engine.delete_branch(MAIN_BRANCH).is_err());

        engine.create_branch("b", None).unwrap();
        engine.switch_branch("b").unwrap();
        assert!(engine.delete_branch("b").is_err());
        engine.switch_branch(MAIN_BRANCH).unwrap();
        engine.delete_branch("b").unwrap();
        assert_eq!(engine.list_branches().len(), 1);
    }

    #[test]
    fn test_clear() {
        let engine = branching();
        record_n(&engine, 3);
        engine.create_branch("x", None).unwrap();
        engine.clear();

        assert!(engine.is_empty());
        assert_eq!(engine.current_index(), None);
        assert_eq!(engine.list_branches().len(), 1);
        assert_eq!(engine.stats(), HistoryStats::default());
    }
}
