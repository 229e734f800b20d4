//! Aggregate configuration, loadable from TOML.
//!
//! ```toml
//! [store]
//! max_action_log = 500
//!
//! [history]
//! max_history = 200
//! enable_branching = true
//!
//! [persistence]
//! strategy = "debounced"
//! debounce_delay = 250
//!
//! [backend]
//! type = "sqlite"
//! path = "data/state.db"
//! ```
//!
//! Every section and field is optional. Durations are milliseconds.

use crate::error::{Result, StoreError};
use crate::history::HistoryConfig;
use crate::persistence::{
    FileBackend, FileBackendConfig, KvBackend, KvBackendConfig, MemoryKv, PersistenceBackend,
    PersistenceConfig, PersistenceManager, SqliteBackend, SqliteBackendConfig,
};
use crate::snapshots::SnapshotConfig;
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Which persistence backend to build.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    File(FileBackendConfig),
    Sqlite(SqliteBackendConfig),
    Kv(KvBackendConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::File(FileBackendConfig::default())
    }
}

impl BackendConfig {
    /// Construct the backend. It still needs `initialize`, which
    /// [`PersistenceManager::new`] does.
    pub fn build(&self) -> Result<Arc<dyn PersistenceBackend>> {
        match self {
            BackendConfig::File(c) => Ok(Arc::new(FileBackend::new(c.clone()))),
            BackendConfig::Sqlite(c) => Ok(Arc::new(SqliteBackend::new(c.clone()))),
            BackendConfig::Kv(c) => match &c.url {
                None => Ok(Arc::new(KvBackend::new(Arc::new(MemoryKv::new()), c.clone()))),
                Some(url) => kv_remote(url, c),
            },
        }
    }
}

#[cfg(feature = "redis")]
fn kv_remote(url: &str, config: &KvBackendConfig) -> Result<Arc<dyn PersistenceBackend>> {
    let client = crate::persistence::RedisKvClient::open(url)?;
    Ok(Arc::new(KvBackend::new(Arc::new(client), config.clone())))
}

#[cfg(not(feature = "redis"))]
fn kv_remote(url: &str, _config: &KvBackendConfig) -> Result<Arc<dyn PersistenceBackend>> {
    Err(StoreError::Config(format!(
        "kv backend url {} needs the `redis` feature",
        url
    )))
}

/// Configuration for every component.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub history: HistoryConfig,
    pub snapshots: SnapshotConfig,
    pub persistence: PersistenceConfig,
    pub backend: BackendConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Build the configured backend and a manager in front of it.
    pub fn persistence_manager(&self) -> Result<PersistenceManager> {
        PersistenceManager::new(self.backend.build()?, self.persistence.clone())
    }
}
