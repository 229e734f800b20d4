//! Snapshot management.
//!
//! A snapshot is a compressed, checksummed copy of a state. Full snapshots
//! hold the entire state; incremental ones hold a [`StateDelta`] against a
//! parent snapshot and are restored by walking the parent chain. The
//! manager indexes snapshots by id and tag, prunes the oldest ones without
//! dependents, and can mirror everything to a storage directory.
//!
//! [`StateDelta`]: crate::state::StateDelta

mod codec;
mod manager;
mod middleware;
mod storage;
mod tags;
mod worker;

pub use codec::{decode_payload, encode_payload};
pub use manager::SnapshotManager;
pub use middleware::SnapshotMiddleware;
pub use storage::SnapshotStorage;
pub use tags::{auto_tags, size_class};
pub use worker::{SnapshotWorker, StateSource};

use crate::types::{duration_ms, option_duration_ms, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Whether a snapshot holds a whole state or a delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Full,
    Incremental,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Full => "full",
            SnapshotType::Incremental => "incremental",
        }
    }
}

/// Payload encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Plain JSON.
    None,
    /// MessagePack, then gzip.
    MsgpackGzip,
    /// JSON, then gzip.
    JsonGzip,
    /// MessagePack only.
    Msgpack,
}

/// A stored snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub timestamp: Timestamp,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub snapshot_type: SnapshotType,
    pub compression: Compression,
    pub parent_id: Option<String>,
    /// SHA-256 hex of `payload`.
    pub checksum: String,
    pub tags: BTreeSet<String>,
    pub size_bytes: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Everything but the payload.
    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            id: self.id.clone(),
            timestamp: self.timestamp,
            snapshot_type: self.snapshot_type,
            compression: self.compression,
            parent_id: self.parent_id.clone(),
            checksum: self.checksum.clone(),
            tags: self.tags.clone(),
            size_bytes: self.size_bytes,
            metadata: self.metadata.clone(),
        }
    }
}

/// Snapshot description without its payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub timestamp: Timestamp,
    pub snapshot_type: SnapshotType,
    pub compression: Compression,
    pub parent_id: Option<String>,
    pub checksum: String,
    pub tags: BTreeSet<String>,
    pub size_bytes: usize,
    pub metadata: BTreeMap<String, Value>,
}

/// Snapshot manager configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshots kept before pruning. 0 disables pruning.
    pub max_snapshots: usize,

    /// Payload encoding for new snapshots.
    pub compression: Compression,

    /// Actions since the last snapshot above which an unspecified type
    /// becomes incremental.
    pub incremental_threshold: u64,

    /// Add date, type, size and slice tags automatically.
    pub auto_tag: bool,

    /// Age after which the cleanup pass removes snapshots. None keeps them.
    #[serde(with = "option_duration_ms")]
    pub retention: Option<Duration>,

    /// Period of the background auto-snapshot. None disables it.
    #[serde(with = "option_duration_ms")]
    pub auto_snapshot_interval: Option<Duration>,

    /// Period of the background retention cleanup.
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,

    /// Directory mirroring every snapshot to disk. None keeps them in memory only.
    pub storage_dir: Option<PathBuf>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 50,
            compression: Compression::MsgpackGzip,
            incremental_threshold: 10,
            auto_tag: true,
            retention: Some(Duration::from_secs(7 * 24 * 3600)),
            auto_snapshot_interval: None,
            cleanup_interval: Duration::from_secs(3600),
            storage_dir: None,
        }
    }
}
