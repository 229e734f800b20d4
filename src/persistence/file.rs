//! File-per-version persistence backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! LOCK
//! index.json              {versions, latest_version, format_version}
//! states/<version>.json   or <version>.json.gz
//! metadata/<version>.json
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! readers never observe a partial write.

use super::codec::{decode_state, encode_state};
use super::locks::VersionLocks;
use super::{LoadedState, PersistenceBackend, SaveMetadata, VersionMetadata};
use crate::error::{Result, StoreError};
use crate::state::State;
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

const INDEX_FORMAT_VERSION: u32 = 1;

/// Configuration for [`FileBackend`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBackendConfig {
    /// Storage root directory.
    pub root: PathBuf,
    /// Gzip state files.
    pub compression: bool,
    /// Minimum serialized size before compression applies.
    pub compression_threshold: usize,
    /// Number of decoded states kept in memory.
    pub cache_size: usize,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("statekeeper-data"),
            compression: true,
            compression_threshold: 1024,
            cache_size: 16,
        }
    }
}

impl FileBackendConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct FileIndex {
    versions: Vec<String>,
    latest_version: Option<String>,
    format_version: u32,
}

struct Opened {
    index: FileIndex,
    // Held for the lifetime of the backend; the lock is released on drop.
    _lock_file: File,
}

/// Stores each version as its own pair of files.
pub struct FileBackend {
    config: FileBackendConfig,
    opened: Mutex<Option<Opened>>,
    locks: VersionLocks,
    cache: Mutex<LruCache<String, LoadedState>>,
}

impl FileBackend {
    pub fn new(config: FileBackendConfig) -> Self {
        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            opened: Mutex::new(None),
            locks: VersionLocks::new(),
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Create and initialize a backend rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let backend = Self::new(FileBackendConfig::new(root));
        backend.initialize()?;
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn states_dir(&self) -> PathBuf {
        self.config.root.join("states")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.config.root.join("metadata")
    }

    fn index_path(&self) -> PathBuf {
        self.config.root.join("index.json")
    }

    fn state_path(&self, version: &str, compressed: bool) -> PathBuf {
        let name = if compressed {
            format!("{}.json.gz", version)
        } else {
            format!("{}.json", version)
        };
        self.states_dir().join(name)
    }

    fn metadata_path(&self, version: &str) -> PathBuf {
        self.metadata_dir().join(format!("{}.json", version))
    }

    fn read_index(&self) -> Result<FileIndex> {
        match fs::read(self.index_path()) {
            Ok(bytes) => {
                let index: FileIndex = serde_json::from_slice(&bytes)?;
                if index.format_version > INDEX_FORMAT_VERSION {
                    return Err(StoreError::InvalidFormat(format!(
                        "Unsupported index format version: {}",
                        index.format_version
                    )));
                }
                Ok(index)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileIndex {
                format_version: INDEX_FORMAT_VERSION,
                ..Default::default()
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn write_index(&self, index: &FileIndex) -> Result<()> {
        write_atomic(&self.index_path(), &serde_json::to_vec_pretty(index)?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.opened.lock().is_some() {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn read_metadata(&self, version: &str) -> Result<Option<VersionMetadata>> {
        match fs::read(self.metadata_path(version)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn latest_version(&self) -> Result<Option<String>> {
        let opened = self.opened.lock();
        let opened = opened.as_ref().ok_or(StoreError::NotInitialized)?;
        Ok(opened.index.latest_version.clone())
    }

    fn is_indexed(&self, version: &str) -> Result<bool> {
        let opened = self.opened.lock();
        let opened = opened.as_ref().ok_or(StoreError::NotInitialized)?;
        Ok(opened.index.versions.iter().any(|v| v == version))
    }
}

impl PersistenceBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn initialize(&self) -> Result<()> {
        let mut opened = self.opened.lock();
        if opened.is_some() {
            return Ok(());
        }

        fs::create_dir_all(self.states_dir())?;
        fs::create_dir_all(self.metadata_dir())?;

        let lock_file = File::create(self.config.root.join("LOCK"))?;
        lock_file.try_lock_exclusive().map_err(|_| StoreError::Locked)?;

        let index = self.read_index()?;
        self.write_index(&index)?;
        tracing::debug!(root = %self.config.root.display(), versions = index.versions.len(), "file backend opened");

        *opened = Some(Opened {
            index,
            _lock_file: lock_file,
        });
        Ok(())
    }

    fn save_state(
        &self,
        state: &State,
        version: &str,
        metadata: &SaveMetadata,
    ) -> Result<VersionMetadata> {
        validate_version(version)?;
        self.ensure_open()?;

        let encoded = encode_state(
            state,
            self.config.compression,
            self.config.compression_threshold,
        )?;
        let meta = encoded.metadata(version, metadata);

        self.locks.with_lock(version, || -> Result<()> {
            write_atomic(&self.state_path(version, encoded.compressed), &encoded.bytes)?;
            // A previous save of the same version may have used the other encoding
            remove_if_exists(&self.state_path(version, !encoded.compressed))?;
            write_atomic(&self.metadata_path(version), &serde_json::to_vec_pretty(&meta)?)?;

            let mut opened = self.opened.lock();
            let opened = opened.as_mut().ok_or(StoreError::NotInitialized)?;
            let mut index = opened.index.clone();
            if !index.versions.iter().any(|v| v == version) {
                index.versions.push(version.to_string());
                index.versions.sort();
            }
            index.latest_version = index.versions.last().cloned();
            self.write_index(&index)?;
            opened.index = index;
            Ok(())
        })?;

        self.cache.lock().put(
            version.to_string(),
            LoadedState {
                state: state.clone(),
                metadata: meta.clone(),
            },
        );
        Ok(meta)
    }

    fn load_state(&self, version: Option<&str>) -> Result<Option<LoadedState>> {
        let version = match version {
            Some(v) => {
                if !self.is_indexed(v)? {
                    return Err(StoreError::VersionNotFound(v.to_string()));
                }
                v.to_string()
            }
            None => match self.latest_version()? {
                Some(v) => v,
                None => return Ok(None),
            },
        };

        if let Some(hit) = self.cache.lock().get(&version).cloned() {
            return Ok(Some(hit));
        }

        let loaded = self.locks.with_lock(&version, || -> Result<LoadedState> {
            let metadata = self
                .read_metadata(&version)?
                .ok_or_else(|| StoreError::VersionNotFound(version.clone()))?;
            let bytes = fs::read(self.state_path(&version, metadata.compressed))?;
            let state = decode_state(&bytes, metadata.compressed, &metadata.checksum, &version)?;
            Ok(LoadedState { state, metadata })
        })?;

        self.cache.lock().put(version, loaded.clone());
        Ok(Some(loaded))
    }

    fn list_versions(&self) -> Result<Vec<String>> {
        let opened = self.opened.lock();
        let opened = opened.as_ref().ok_or(StoreError::NotInitialized)?;
        Ok(opened.index.versions.clone())
    }

    fn delete_version(&self, version: &str) -> Result<bool> {
        validate_version(version)?;
        self.ensure_open()?;

        let deleted = self.locks.with_lock(version, || -> Result<bool> {
            let mut opened = self.opened.lock();
            let opened = opened.as_mut().ok_or(StoreError::NotInitialized)?;
            if !opened.index.versions.iter().any(|v| v == version) {
                return Ok(false);
            }

            let mut index = opened.index.clone();
            index.versions.retain(|v| v != version);
            index.latest_version = index.versions.last().cloned();
            self.write_index(&index)?;
            opened.index = index;

            remove_if_exists(&self.state_path(version, true))?;
            remove_if_exists(&self.state_path(version, false))?;
            remove_if_exists(&self.metadata_path(version))?;
            Ok(true)
        })?;

        if deleted {
            self.cache.lock().pop(version);
        }
        Ok(deleted)
    }

    fn get_metadata(&self, version: &str) -> Result<Option<VersionMetadata>> {
        validate_version(version)?;
        self.ensure_open()?;
        self.read_metadata(version)
    }

    fn close(&self) -> Result<()> {
        if self.opened.lock().take().is_some() {
            tracing::debug!(root = %self.config.root.display(), "file backend closed");
        }
        self.cache.lock().clear();
        Ok(())
    }
}

/// Versions become file names, so they must not contain path syntax.
fn validate_version(version: &str) -> Result<()> {
    let valid = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidOperation(format!(
            "Invalid version string: {:?}",
            version
        )))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
