//! Snapshot manager: creation, restore, tagging and pruning.

use super::codec::{decode_payload, encode_payload};
use super::storage::SnapshotStorage;
use super::tags::auto_tags;
use super::{Snapshot, SnapshotConfig, SnapshotInfo, SnapshotType};
use crate::error::{Result, StoreError};
use crate::state::{State, StateDelta};
use crate::types::{new_id, Checksum, Timestamp};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// In-memory snapshot index.
#[derive(Default)]
struct SnapshotIndex {
    /// Snapshots by id.
    snapshots: HashMap<String, Snapshot>,
    /// Ids in creation order, oldest first.
    order: Vec<String>,
    /// Tag to snapshot ids.
    tags: HashMap<String, BTreeSet<String>>,
    /// Actions counted since the last snapshot.
    actions_since_last: u64,
}

impl SnapshotIndex {
    fn latest_id(&self) -> Option<&String> {
        self.order.last()
    }

    fn insert(&mut self, snapshot: Snapshot) {
        for tag in &snapshot.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(snapshot.id.clone());
        }
        self.order.push(snapshot.id.clone());
        self.snapshots.insert(snapshot.id.clone(), snapshot);
    }

    fn remove(&mut self, id: &str) -> Option<Snapshot> {
        let snapshot = self.snapshots.remove(id)?;
        self.order.retain(|o| o != id);
        for tag in &snapshot.tags {
            if let Some(ids) = self.tags.get_mut(tag) {
                ids.remove(id);
                if ids.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(snapshot)
    }

    /// Ids of snapshots whose parent is `id`.
    fn dependents(&self, id: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|o| {
                self.snapshots
                    .get(*o)
                    .is_some_and(|s| s.parent_id.as_deref() == Some(id))
            })
            .cloned()
            .collect()
    }

    /// Verify and decode a snapshot, walking incremental parents.
    fn restore(&self, id: &str) -> Result<State> {
        let mut chain = Vec::new();
        let mut cursor = Some(id.to_string());
        while let Some(current) = cursor {
            let snapshot = self
                .snapshots
                .get(&current)
                .ok_or_else(|| StoreError::SnapshotNotFound(current.clone()))?;
            verify(snapshot)?;
            if chain.len() > self.snapshots.len() {
                return Err(StoreError::InvalidFormat(format!(
                    "snapshot {} has a cyclic parent chain",
                    id
                )));
            }
            chain.push(snapshot);
            cursor = match snapshot.snapshot_type {
                SnapshotType::Full => None,
                SnapshotType::Incremental => Some(snapshot.parent_id.clone().ok_or_else(|| {
                    StoreError::InvalidFormat(format!(
                        "incremental snapshot {} has no parent",
                        snapshot.id
                    ))
                })?),
            };
        }

        let mut chain = chain.into_iter().rev();
        let base = chain
            .next()
            .ok_or_else(|| StoreError::SnapshotNotFound(id.to_string()))?;
        let mut state: State = decode_payload(&base.payload, base.compression)?;
        for snapshot in chain {
            let delta: StateDelta = decode_payload(&snapshot.payload, snapshot.compression)?;
            state = delta.apply(&state);
        }
        Ok(state)
    }
}

fn verify(snapshot: &Snapshot) -> Result<()> {
    let got = Checksum::from_bytes(&snapshot.payload).to_hex();
    if got != snapshot.checksum {
        return Err(StoreError::Integrity {
            id: snapshot.id.clone(),
            expected: snapshot.checksum.clone(),
            got,
        });
    }
    Ok(())
}

/// Creates, indexes, restores and prunes snapshots.
pub struct SnapshotManager {
    config: SnapshotConfig,
    index: RwLock<SnapshotIndex>,
    storage: Option<SnapshotStorage>,
}

impl SnapshotManager {
    /// Create a manager. With a storage directory, existing snapshot files are loaded.
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        let storage = match config.storage_dir {
            Some(ref dir) => Some(SnapshotStorage::new(dir)?),
            None => None,
        };

        let mut index = SnapshotIndex::default();
        if let Some(ref storage) = storage {
            for snapshot in storage.load_all()? {
                index.insert(snapshot);
            }
            tracing::debug!(count = index.order.len(), dir = %storage.path().display(), "snapshots loaded");
        }

        Ok(Self {
            config,
            index: RwLock::new(index),
            storage,
        })
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    // --- Creation ---

    /// Snapshot `state`. With no explicit type, the snapshot is incremental
    /// once more than `incremental_threshold` actions were counted since the
    /// previous snapshot, and full otherwise.
    pub fn create_snapshot(
        &self,
        state: &State,
        metadata: Option<BTreeMap<String, Value>>,
        tags: Option<Vec<String>>,
        snapshot_type: Option<SnapshotType>,
    ) -> Result<String> {
        let mut index = self.index.write();

        let wanted = match snapshot_type {
            Some(t) => t,
            None if index.actions_since_last > self.config.incremental_threshold => {
                SnapshotType::Incremental
            }
            None => SnapshotType::Full,
        };
        // An incremental snapshot with nothing to diff against is stored full.
        let parent = match wanted {
            SnapshotType::Incremental => index.latest_id().cloned(),
            SnapshotType::Full => None,
        };

        let snapshot = self.build(&index, state, parent, metadata, tags)?;
        self.commit(&mut index, snapshot)
    }

    /// Snapshot `state` as a delta against `base_id`.
    pub fn create_incremental(
        &self,
        base_id: &str,
        state: &State,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> Result<String> {
        let mut index = self.index.write();
        if !index.snapshots.contains_key(base_id) {
            return Err(StoreError::SnapshotNotFound(base_id.to_string()));
        }
        let snapshot = self.build(&index, state, Some(base_id.to_string()), metadata, None)?;
        self.commit(&mut index, snapshot)
    }

    /// Encode a snapshot of `state`, as a delta when `parent` is given.
    fn build(
        &self,
        index: &SnapshotIndex,
        state: &State,
        parent: Option<String>,
        metadata: Option<BTreeMap<String, Value>>,
        tags: Option<Vec<String>>,
    ) -> Result<Snapshot> {
        let compression = self.config.compression;
        let (snapshot_type, payload) = match parent {
            Some(ref parent_id) => {
                let base = index.restore(parent_id)?;
                let delta = StateDelta::between(&base, state);
                (SnapshotType::Incremental, encode_payload(&delta, compression)?)
            }
            None => (SnapshotType::Full, encode_payload(state, compression)?),
        };

        let timestamp = Timestamp::now();
        let size_bytes = payload.len();
        let mut all_tags: BTreeSet<String> = tags.unwrap_or_default().into_iter().collect();
        if self.config.auto_tag {
            all_tags.extend(auto_tags(state, timestamp, snapshot_type, size_bytes));
        }

        Ok(Snapshot {
            id: new_id(),
            timestamp,
            checksum: Checksum::from_bytes(&payload).to_hex(),
            size_bytes,
            payload,
            snapshot_type,
            compression,
            parent_id: parent,
            tags: all_tags,
            metadata: metadata.unwrap_or_default(),
        })
    }

    fn commit(&self, index: &mut SnapshotIndex, snapshot: Snapshot) -> Result<String> {
        if let Some(ref storage) = self.storage {
            storage.write(&snapshot)?;
        }
        let id = snapshot.id.clone();
        tracing::debug!(
            id = %id,
            snapshot_type = snapshot.snapshot_type.as_str(),
            size = snapshot.size_bytes,
            "snapshot created"
        );
        index.insert(snapshot);
        index.actions_since_last = 0;
        self.prune(index)?;
        Ok(id)
    }

    // --- Restore ---

    /// Rebuild the state a snapshot describes. Checksums are verified along
    /// the whole parent chain.
    pub fn restore_snapshot(&self, id: &str) -> Result<State> {
        self.index.read().restore(id)
    }

    /// Delta turning snapshot `from_id` into snapshot `to_id`.
    pub fn snapshot_delta(&self, from_id: &str, to_id: &str) -> Result<StateDelta> {
        let index = self.index.read();
        let from = index.restore(from_id)?;
        let to = index.restore(to_id)?;
        Ok(StateDelta::between(&from, &to))
    }

    // --- Queries ---

    /// Snapshots carrying every tag in `tags`, oldest first.
    pub fn list_snapshots(&self, tags: &[&str]) -> Vec<SnapshotInfo> {
        let index = self.index.read();
        index
            .order
            .iter()
            .filter(|id| {
                tags.iter().all(|tag| {
                    index
                        .tags
                        .get(*tag)
                        .is_some_and(|ids| ids.contains(id.as_str()))
                })
            })
            .filter_map(|id| index.snapshots.get(id).map(Snapshot::info))
            .collect()
    }

    pub fn get_snapshot_info(&self, id: &str) -> Option<SnapshotInfo> {
        self.index.read().snapshots.get(id).map(Snapshot::info)
    }

    /// Full snapshot record, payload included.
    pub fn get_snapshot(&self, id: &str) -> Option<Snapshot> {
        self.index.read().snapshots.get(id).cloned()
    }

    pub fn latest_snapshot_id(&self) -> Option<String> {
        self.index.read().latest_id().cloned()
    }

    /// Ids of snapshots directly depending on `id`.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.index.read().dependents(id)
    }

    pub fn len(&self) -> usize {
        self.index.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- Action counting ---

    /// Count one dispatched action toward the incremental threshold.
    pub fn record_action(&self) {
        self.index.write().actions_since_last += 1;
    }

    pub fn actions_since_last(&self) -> u64 {
        self.index.read().actions_since_last
    }

    // --- Deletion ---

    /// Delete a snapshot. Refuses (returns false) when others depend on it.
    pub fn delete_snapshot(&self, id: &str) -> Result<bool> {
        let mut index = self.index.write();
        if !index.snapshots.contains_key(id) {
            return Ok(false);
        }
        let dependents = index.dependents(id);
        if !dependents.is_empty() {
            tracing::info!(id = %id, dependents = dependents.len(), "snapshot has dependents, not deleting");
            return Ok(false);
        }
        self.remove(&mut index, id)?;
        Ok(true)
    }

    fn remove(&self, index: &mut SnapshotIndex, id: &str) -> Result<()> {
        if let Some(ref storage) = self.storage {
            storage.delete(id)?;
        }
        index.remove(id);
        Ok(())
    }

    /// Turn an incremental snapshot into a full one holding the same state.
    fn promote(&self, index: &mut SnapshotIndex, id: &str) -> Result<()> {
        let state = index.restore(id)?;
        let payload = encode_payload(&state, self.config.compression)?;

        let position = index
            .order
            .iter()
            .position(|o| o == id)
            .ok_or_else(|| StoreError::SnapshotNotFound(id.to_string()))?;
        let Some(mut snapshot) = index.remove(id) else {
            return Err(StoreError::SnapshotNotFound(id.to_string()));
        };

        snapshot
            .tags
            .remove(&format!("type:{}", SnapshotType::Incremental.as_str()));
        if self.config.auto_tag {
            snapshot
                .tags
                .insert(format!("type:{}", SnapshotType::Full.as_str()));
        }
        snapshot.checksum = Checksum::from_bytes(&payload).to_hex();
        snapshot.size_bytes = payload.len();
        snapshot.payload = payload;
        snapshot.snapshot_type = SnapshotType::Full;
        snapshot.compression = self.config.compression;
        snapshot.parent_id = None;

        if let Some(ref storage) = self.storage {
            storage.write(&snapshot)?;
        }

        // Back to its original place in creation order
        index.insert(snapshot);
        if let Some(moved) = index.order.pop() {
            index.order.insert(position, moved);
        }
        tracing::debug!(id = %id, "snapshot promoted to full");
        Ok(())
    }

    /// Drop the oldest snapshots beyond `max_snapshots`. Never drops the newest.
    fn prune(&self, index: &mut SnapshotIndex) -> Result<usize> {
        let max = self.config.max_snapshots;
        if max == 0 {
            return Ok(0);
        }

        let mut removed = 0;
        while index.order.len() > max {
            let candidates = &index.order[..index.order.len() - 1];
            let free = candidates
                .iter()
                .find(|id| index.dependents(id).is_empty())
                .cloned();

            match free {
                Some(id) => {
                    self.remove(index, &id)?;
                }
                None => {
                    // Every candidate has dependents: detach the oldest.
                    let Some(oldest) = candidates.first().cloned() else {
                        break;
                    };
                    let dependents = index.dependents(&oldest);
                    for dependent in &dependents {
                        self.promote(index, dependent)?;
                    }
                    tracing::warn!(
                        id = %oldest,
                        promoted = dependents.len(),
                        "force-deleting snapshot with dependents"
                    );
                    self.remove(index, &oldest)?;
                }
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove snapshots older than the retention period that nothing depends
    /// on, never the newest. Returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let Some(retention) = self.config.retention else {
            return Ok(0);
        };
        let cutoff = Timestamp::now().0 - retention.as_micros() as i64;

        let mut index = self.index.write();
        let mut removed = 0;
        loop {
            let latest = index.latest_id().cloned();
            let expired = index
                .order
                .iter()
                .filter(|id| Some(*id) != latest.as_ref())
                .find(|id| {
                    index.snapshots.get(*id).is_some_and(|s| s.timestamp.0 < cutoff)
                        && index.dependents(id).is_empty()
                })
                .cloned();
            let Some(id) = expired else {
                break;
            };
            self.remove(&mut index, &id)?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, "expired snapshots removed");
        }
        Ok(removed)
    }
}
