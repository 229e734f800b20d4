//! Pluggable persistence of store state.
//!
//! A [`PersistenceBackend`] stores immutable, versioned copies of the
//! state. Versions are ULID strings, so their lexical order is their
//! creation order. Three backends ship with the crate:
//!
//! - [`FileBackend`]: one JSON (optionally gzipped) file per version plus
//!   an index file, under an exclusive lock file.
//! - [`SqliteBackend`]: an embedded SQLite database.
//! - [`KvBackend`]: a key-value store reached through a [`KvClient`].
//!
//! [`PersistenceManager`] sits in front of a backend and decides when to
//! write (immediately, debounced, batched or manually), retrying failed
//! saves and pruning old versions. [`PersistenceMiddleware`] feeds it from
//! the dispatch pipeline.

mod codec;
mod file;
mod kv;
mod locks;
mod manager;
mod middleware;
mod sqlite;

pub use codec::{decode_state, encode_state, EncodedState};
pub use file::{FileBackend, FileBackendConfig};
#[cfg(feature = "redis")]
pub use kv::RedisKvClient;
pub use kv::{KvBackend, KvBackendConfig, KvClient, KvOp, MemoryKv};
pub use locks::VersionLocks;
pub use manager::{PersistenceConfig, PersistenceManager, PersistenceStats, SaveStrategy};
pub use middleware::PersistenceMiddleware;
pub use sqlite::{SqliteBackend, SqliteBackendConfig};

use crate::error::Result;
use crate::state::State;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schema version written by this crate.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// What the caller knows about a save.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    /// Type of the action that produced the state.
    pub action_type: Option<String>,
    /// Schema version of the state. 0 means current.
    #[serde(default)]
    pub schema_version: u32,
    /// Free-form user metadata.
    #[serde(default)]
    pub user: BTreeMap<String, Value>,
}

impl SaveMetadata {
    pub fn for_action(action_type: impl Into<String>) -> Self {
        Self {
            action_type: Some(action_type.into()),
            ..Default::default()
        }
    }

    pub(crate) fn effective_schema_version(&self) -> u32 {
        if self.schema_version == 0 {
            CURRENT_SCHEMA_VERSION
        } else {
            self.schema_version
        }
    }
}

/// Stored description of one persisted version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version: String,
    pub timestamp: Timestamp,
    pub action_type: Option<String>,
    /// Serialized size before compression.
    pub size_bytes: usize,
    /// Stored size.
    pub compressed_size: usize,
    /// `compressed_size / size_bytes`.
    pub compression_ratio: f64,
    /// SHA-256 hex of the uncompressed serialized state.
    pub checksum: String,
    pub compressed: bool,
    pub schema_version: u32,
    #[serde(default)]
    pub user: BTreeMap<String, Value>,
}

/// A loaded state with its metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedState {
    pub state: State,
    pub metadata: VersionMetadata,
}

/// Storage for versioned states.
///
/// Implementations must be safe to call from several threads; writes to the
/// same version are serialized.
pub trait PersistenceBackend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Prepare storage (directories, schema, locks). Idempotent.
    fn initialize(&self) -> Result<()>;

    /// Store `state` as `version`.
    fn save_state(&self, state: &State, version: &str, metadata: &SaveMetadata)
        -> Result<VersionMetadata>;

    /// Load `version`, or the latest version when None. A missing explicit
    /// version is `VersionNotFound`; an empty backend loads `None`.
    fn load_state(&self, version: Option<&str>) -> Result<Option<LoadedState>>;

    /// Versions oldest to newest.
    fn list_versions(&self) -> Result<Vec<String>>;

    /// Delete one version. Returns false if it did not exist.
    fn delete_version(&self, version: &str) -> Result<bool>;

    fn get_metadata(&self, version: &str) -> Result<Option<VersionMetadata>>;

    /// Delete the oldest versions beyond `max_versions`. Individual failures
    /// are logged and skipped. Returns how many were deleted.
    fn prune_old_versions(&self, max_versions: usize) -> Result<usize> {
        let versions = self.list_versions()?;
        if versions.len() <= max_versions {
            return Ok(0);
        }
        let excess = versions.len() - max_versions;
        let mut deleted = 0;
        for version in &versions[..excess] {
            match self.delete_version(version) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(backend = self.name(), version = %version, error = %e, "failed to prune version");
                }
            }
        }
        Ok(deleted)
    }

    /// Release resources. Further calls may fail with `NotInitialized`.
    fn close(&self) -> Result<()>;
}
