//! Key-value persistence backend.
//!
//! Key scheme, for a prefix `p`:
//!
//! ```text
//! p:states:<version>    encoded state bytes
//! p:metadata:<version>  VersionMetadata JSON
//! p:index               JSON array of versions
//! p:latest              latest version
//! ```
//!
//! Each save or delete goes to the client as one atomic batch, so the four
//! keys never disagree.

use super::codec::{decode_state, encode_state};
use super::locks::VersionLocks;
use super::{LoadedState, PersistenceBackend, SaveMetadata, VersionMetadata};
use crate::error::{Result, StoreError};
use crate::state::State;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One write in an atomic batch.
#[derive(Clone, Debug, PartialEq)]
pub enum KvOp {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
}

/// Transport to a key-value store.
pub trait KvClient: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Apply every op or none of them.
    fn exec_atomic(&self, ops: &[KvOp]) -> Result<()>;
}

// --- In-process client ---

/// In-process key-value store with expiry. Useful for tests and for
/// single-process deployments.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires)| expires.map_or(true, |at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvClient for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    fn exec_atomic(&self, ops: &[KvOp]) -> Result<()> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        for op in ops {
            match op {
                KvOp::Set { key, value, ttl } => {
                    entries.insert(key.clone(), (value.clone(), ttl.map(|t| now + t)));
                }
                KvOp::Delete { key } => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }
}

// --- Redis client ---

/// Redis transport. Batches run as `MULTI`/`EXEC` pipelines.
#[cfg(feature = "redis")]
pub struct RedisKvClient {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
}

#[cfg(feature = "redis")]
impl RedisKvClient {
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(redis_error)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.client.get_connection().map_err(redis_error)?);
        }
        let conn = guard.as_mut().ok_or(StoreError::NotInitialized)?;
        match f(conn) {
            Ok(v) => Ok(v),
            Err(e) => {
                // Reconnect on the next call
                *guard = None;
                Err(redis_error(e))
            }
        }
    }
}

#[cfg(feature = "redis")]
fn redis_error(e: redis::RedisError) -> StoreError {
    StoreError::Io(std::io::Error::other(e.to_string()))
}

#[cfg(feature = "redis")]
impl KvClient for RedisKvClient {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn exec_atomic(&self, ops: &[KvOp]) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                KvOp::Set {
                    key,
                    value,
                    ttl: Some(ttl),
                } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value.as_slice())
                        .arg("PX")
                        .arg(ttl.as_millis() as u64)
                        .ignore();
                }
                KvOp::Set {
                    key,
                    value,
                    ttl: None,
                } => {
                    pipe.cmd("SET").arg(key).arg(value.as_slice()).ignore();
                }
                KvOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
            }
        }
        self.with_conn(|conn| pipe.query::<()>(conn))
    }
}

// --- Backend ---

/// Configuration for [`KvBackend`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KvBackendConfig {
    pub prefix: String,
    /// Expiry applied to every key written. None keeps keys forever.
    #[serde(with = "crate::types::option_duration_ms")]
    pub ttl: Option<Duration>,
    pub compression: bool,
    pub compression_threshold: usize,
    /// Connection URL for the Redis transport.
    pub url: Option<String>,
}

impl Default for KvBackendConfig {
    fn default() -> Self {
        Self {
            prefix: "statekeeper".to_string(),
            ttl: None,
            compression: true,
            compression_threshold: 1024,
            url: None,
        }
    }
}

/// Persists versions through a [`KvClient`].
///
/// With a TTL, versions can expire while still listed in the index; loading
/// such a version reports `VersionNotFound`.
pub struct KvBackend {
    config: KvBackendConfig,
    client: Arc<dyn KvClient>,
    initialized: AtomicBool,
    locks: VersionLocks,
    // Serializes read-modify-write of the index key
    index_lock: Mutex<()>,
}

impl KvBackend {
    pub fn new(client: Arc<dyn KvClient>, config: KvBackendConfig) -> Self {
        Self {
            config,
            client,
            initialized: AtomicBool::new(false),
            locks: VersionLocks::new(),
            index_lock: Mutex::new(()),
        }
    }

    /// Backend over a fresh [`MemoryKv`].
    pub fn in_memory(config: KvBackendConfig) -> Self {
        Self::new(Arc::new(MemoryKv::new()), config)
    }

    fn key(&self, parts: &[&str]) -> String {
        let mut key = self.config.prefix.clone();
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        key
    }

    fn ensure_open(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.client.get(&self.key(&["index"]))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn set(&self, key: String, value: Vec<u8>) -> KvOp {
        KvOp::Set {
            key,
            value,
            ttl: self.config.ttl,
        }
    }

    /// Index and latest-pointer writes for `versions`.
    fn index_ops(&self, versions: &[String]) -> Result<Vec<KvOp>> {
        let mut ops = vec![self.set(self.key(&["index"]), serde_json::to_vec(versions)?)];
        match versions.last() {
            Some(latest) => ops.push(self.set(self.key(&["latest"]), latest.as_bytes().to_vec())),
            None => ops.push(KvOp::Delete {
                key: self.key(&["latest"]),
            }),
        }
        Ok(ops)
    }
}

impl PersistenceBackend for KvBackend {
    fn name(&self) -> &str {
        "kv"
    }

    fn initialize(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            tracing::debug!(prefix = %self.config.prefix, "kv backend initialized");
        }
        Ok(())
    }

    fn save_state(
        &self,
        state: &State,
        version: &str,
        metadata: &SaveMetadata,
    ) -> Result<VersionMetadata> {
        self.ensure_open()?;
        let encoded = encode_state(
            state,
            self.config.compression,
            self.config.compression_threshold,
        )?;
        let meta = encoded.metadata(version, metadata);
        let meta_json = serde_json::to_vec(&meta)?;

        self.locks.with_lock(version, || -> Result<()> {
            let _index = self.index_lock.lock();
            let mut versions = self.read_index()?;
            if !versions.iter().any(|v| v == version) {
                versions.push(version.to_string());
                versions.sort();
            }

            let mut ops = vec![
                self.set(self.key(&["states", version]), encoded.bytes.clone()),
                self.set(self.key(&["metadata", version]), meta_json),
            ];
            ops.extend(self.index_ops(&versions)?);
            self.client.exec_atomic(&ops)
        })?;

        Ok(meta)
    }

    fn load_state(&self, version: Option<&str>) -> Result<Option<LoadedState>> {
        self.ensure_open()?;
        let version = match version {
            Some(v) => v.to_string(),
            None => match self.client.get(&self.key(&["latest"]))? {
                Some(bytes) => String::from_utf8(bytes)
                    .map_err(|e| StoreError::InvalidFormat(e.to_string()))?,
                None => return Ok(None),
            },
        };

        self.locks.with_lock(&version, || -> Result<Option<LoadedState>> {
            let metadata = self
                .get_metadata(&version)?
                .ok_or_else(|| StoreError::VersionNotFound(version.clone()))?;
            let bytes = self
                .client
                .get(&self.key(&["states", &version]))?
                .ok_or_else(|| StoreError::VersionNotFound(version.clone()))?;
            let state = decode_state(&bytes, metadata.compressed, &metadata.checksum, &version)?;
            Ok(Some(LoadedState { state, metadata }))
        })
    }

    fn list_versions(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.read_index()
    }

    fn delete_version(&self, version: &str) -> Result<bool> {
        self.ensure_open()?;
        self.locks.with_lock(version, || -> Result<bool> {
            let _index = self.index_lock.lock();
            let mut versions = self.read_index()?;
            let before = versions.len();
            versions.retain(|v| v != version);
            if versions.len() == before {
                return Ok(false);
            }

            let mut ops = vec![
                KvOp::Delete {
                    key: self.key(&["states", version]),
                },
                KvOp::Delete {
                    key: self.key(&["metadata", version]),
                },
            ];
            ops.extend(self.index_ops(&versions)?);
            self.client.exec_atomic(&ops)?;
            Ok(true)
        })
    }

    fn get_metadata(&self, version: &str) -> Result<Option<VersionMetadata>> {
        self.ensure_open()?;
        match self.client.get(&self.key(&["metadata", version]))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn close(&self) -> Result<()> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn state(n: i64) -> State {
        State::new().with_slice("counter", json!(n))
    }

    fn backend(client: Arc<MemoryKv>, config: KvBackendConfig) -> KvBackend {
        let backend = KvBackend::new(client, config);
        backend.initialize().unwrap();
        backend
    }

    #[test]
    fn test_key_scheme() {
        let client = Arc::new(MemoryKv::new());
        let config = KvBackendConfig {
            prefix: "app".to_string(),
            ..Default::default()
        };
        let kv = backend(Arc::clone(&client), config);
        kv.save_state(&state(1), "v1", &SaveMetadata::default()).unwrap();

        assert!(client.get("app:states:v1").unwrap().is_some());
        assert!(client.get("app:metadata:v1").unwrap().is_some());
        assert_eq!(client.get("app:latest").unwrap().unwrap(), b"v1".to_vec());
        let index: Vec<String> =
            serde_json::from_slice(&client.get("app:index").unwrap().unwrap()).unwrap();
        assert_eq!(index, vec!["v1"]);
    }

    #[test]
    fn test_save_load_delete() {
        let kv = backend(Arc::new(MemoryKv::new()), KvBackendConfig::default());
        assert!(kv.load_state(None).unwrap().is_none());

        for i in 1..=3 {
            kv.save_state(&state(i), &format!("v{}", i), &SaveMetadata::default())
                .unwrap();
        }
        assert_eq!(kv.load_state(None).unwrap().unwrap().state, state(3));
        assert_eq!(kv.load_state(Some("v1")).unwrap().unwrap().state, state(1));

        assert!(kv.delete_version("v3").unwrap());
        assert!(!kv.delete_version("v3").unwrap());
        assert_eq!(kv.load_state(None).unwrap().unwrap().state, state(2));

        assert_eq!(kv.prune_old_versions(1).unwrap(), 1);
        assert_eq!(kv.list_versions().unwrap(), vec!["v2"]);
        assert!(matches!(
            kv.load_state(Some("v1")),
            Err(StoreError::VersionNotFound(_))
        ));
    }

    #[test]
    fn test_ttl_expires_keys() {
        let client = Arc::new(MemoryKv::new());
        let kv = backend(
            Arc::clone(&client),
            KvBackendConfig {
                ttl: Some(Duration::from_millis(30)),
                ..Default::default()
            },
        );
        kv.save_state(&state(1), "v1", &SaveMetadata::default()).unwrap();
        assert_eq!(client.len(), 4);

        thread::sleep(Duration::from_millis(60));
        assert!(client.is_empty());
        assert!(kv.load_state(None).unwrap().is_none());
    }

    #[test]
    fn test_requires_initialize() {
        let kv = KvBackend::in_memory(KvBackendConfig::default());
        assert!(matches!(
            kv.save_state(&state(1), "v1", &SaveMetadata::default()),
            Err(StoreError::NotInitialized)
        ));
    }
}
