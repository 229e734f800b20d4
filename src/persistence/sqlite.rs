//! Embedded SQLite persistence backend.

use super::codec::{decode_state, encode_state};
use super::locks::VersionLocks;
use super::{LoadedState, PersistenceBackend, SaveMetadata, VersionMetadata};
use crate::error::{Result, StoreError};
use crate::state::State;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS states (
  version TEXT PRIMARY KEY,
  timestamp INTEGER NOT NULL,
  state_data BLOB NOT NULL,
  compressed INTEGER NOT NULL,
  size_bytes INTEGER NOT NULL,
  checksum TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
  version TEXT PRIMARY KEY REFERENCES states(version) ON DELETE CASCADE,
  timestamp INTEGER NOT NULL,
  metadata_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS state_index (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  version TEXT NOT NULL UNIQUE REFERENCES states(version) ON DELETE CASCADE,
  timestamp INTEGER NOT NULL,
  is_latest INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_states_timestamp ON states(timestamp);
CREATE INDEX IF NOT EXISTS idx_state_index_timestamp ON state_index(timestamp);
CREATE INDEX IF NOT EXISTS idx_state_index_latest ON state_index(is_latest);
"#;

/// Configuration for [`SqliteBackend`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteBackendConfig {
    /// Database file. None opens an in-memory database.
    pub path: Option<PathBuf>,
    pub compression: bool,
    pub compression_threshold: usize,
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("statekeeper.db")),
            compression: true,
            compression_threshold: 1024,
        }
    }
}

impl SqliteBackendConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            ..Default::default()
        }
    }
}

/// Stores versions in three tables: `states`, `metadata` and
/// `state_index`, the last carrying the `is_latest` marker.
pub struct SqliteBackend {
    config: SqliteBackendConfig,
    conn: Mutex<Option<Connection>>,
    locks: VersionLocks,
}

impl SqliteBackend {
    pub fn new(config: SqliteBackendConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
            locks: VersionLocks::new(),
        }
    }

    /// Create and initialize a backend.
    pub fn open(config: SqliteBackendConfig) -> Result<Self> {
        let backend = Self::new(config);
        backend.initialize()?;
        Ok(backend)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let conn = conn.as_mut().ok_or(StoreError::NotInitialized)?;
        f(conn)
    }
}

/// Point `is_latest` at the greatest remaining version.
fn refresh_latest(tx: &Transaction<'_>) -> Result<()> {
    tx.execute("UPDATE state_index SET is_latest = 0 WHERE is_latest = 1", [])?;
    tx.execute(
        "UPDATE state_index SET is_latest = 1
         WHERE version = (SELECT MAX(version) FROM state_index)",
        [],
    )?;
    Ok(())
}

impl PersistenceBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn initialize(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        if conn.is_some() {
            return Ok(());
        }

        let opened = match &self.config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let c = Connection::open(path)?;
                c.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
                c
            }
            None => Connection::open_in_memory()?,
        };
        opened.execute_batch("PRAGMA foreign_keys=ON;")?;
        opened.execute_batch(SCHEMA)?;

        tracing::debug!(path = ?self.config.path, "sqlite backend opened");
        *conn = Some(opened);
        Ok(())
    }

    fn save_state(
        &self,
        state: &State,
        version: &str,
        metadata: &SaveMetadata,
    ) -> Result<VersionMetadata> {
        let encoded = encode_state(
            state,
            self.config.compression,
            self.config.compression_threshold,
        )?;
        let meta = encoded.metadata(version, metadata);
        let metadata_json = serde_json::to_string(&meta)?;
        let created_at = chrono::Utc::now().to_rfc3339();

        self.locks.with_lock(version, || {
            self.with_conn(|conn| {
                // Dropping an uncommitted transaction rolls it back
                let tx = conn.transaction()?;
                tx.execute(
                    r#"
                    INSERT INTO states (version, timestamp, state_data, compressed, size_bytes, checksum, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(version) DO UPDATE SET
                      timestamp = excluded.timestamp,
                      state_data = excluded.state_data,
                      compressed = excluded.compressed,
                      size_bytes = excluded.size_bytes,
                      checksum = excluded.checksum
                    "#,
                    params![
                        version,
                        meta.timestamp.0,
                        encoded.bytes,
                        encoded.compressed,
                        encoded.size_bytes as i64,
                        encoded.checksum,
                        created_at,
                    ],
                )?;
                tx.execute(
                    r#"
                    INSERT INTO metadata (version, timestamp, metadata_json, created_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(version) DO UPDATE SET
                      timestamp = excluded.timestamp,
                      metadata_json = excluded.metadata_json
                    "#,
                    params![version, meta.timestamp.0, metadata_json, created_at],
                )?;
                tx.execute(
                    r#"
                    INSERT INTO state_index (version, timestamp, is_latest, created_at)
                    VALUES (?1, ?2, 0, ?3)
                    ON CONFLICT(version) DO UPDATE SET timestamp = excluded.timestamp
                    "#,
                    params![version, meta.timestamp.0, created_at],
                )?;
                refresh_latest(&tx)?;
                tx.commit()?;
                Ok(())
            })
        })?;

        Ok(meta)
    }

    fn load_state(&self, version: Option<&str>) -> Result<Option<LoadedState>> {
        let version = match version {
            Some(v) => v.to_string(),
            None => {
                let latest = self.with_conn(|conn| {
                    Ok(conn
                        .query_row(
                            "SELECT version FROM state_index WHERE is_latest = 1 LIMIT 1",
                            [],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?)
                })?;
                match latest {
                    Some(v) => v,
                    None => return Ok(None),
                }
            }
        };

        let row = self.locks.with_lock(&version, || {
            self.with_conn(|conn| {
                Ok(conn
                    .query_row(
                        r#"
                        SELECT s.state_data, m.metadata_json
                        FROM states s JOIN metadata m ON m.version = s.version
                        WHERE s.version = ?1
                        "#,
                        params![version],
                        |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?)
            })
        })?;

        let (bytes, metadata_json) =
            row.ok_or_else(|| StoreError::VersionNotFound(version.clone()))?;
        let metadata: VersionMetadata = serde_json::from_str(&metadata_json)?;
        let state = decode_state(&bytes, metadata.compressed, &metadata.checksum, &version)?;
        Ok(Some(LoadedState { state, metadata }))
    }

    fn list_versions(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT version FROM states ORDER BY version ASC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    fn delete_version(&self, version: &str) -> Result<bool> {
        self.locks.with_lock(version, || {
            self.with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM state_index WHERE version = ?1", params![version])?;
                tx.execute("DELETE FROM metadata WHERE version = ?1", params![version])?;
                let deleted = tx.execute("DELETE FROM states WHERE version = ?1", params![version])?;
                if deleted > 0 {
                    refresh_latest(&tx)?;
                }
                tx.commit()?;
                Ok(deleted > 0)
            })
        })
    }

    fn get_metadata(&self, version: &str) -> Result<Option<VersionMetadata>> {
        let json = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT metadata_json FROM metadata WHERE version = ?1",
                    params![version],
                    |row| row.get::<_, String>(0),
                )
                .optional()?)
        })?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| StoreError::Sql(e))?;
            tracing::debug!(path = ?self.config.path, "sqlite backend closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn state(n: i64) -> State {
        State::new()
            .with_slice("counter", json!(n))
            .with_slice("notes", json!(["a".repeat(2048)]))
    }

    fn latest_flags(backend: &SqliteBackend) -> Vec<String> {
        backend
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT version FROM state_index WHERE is_latest = 1")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
            })
            .unwrap()
    }

    #[test]
    fn test_save_load_in_memory() {
        let backend = SqliteBackend::open(SqliteBackendConfig::in_memory()).unwrap();
        assert!(backend.load_state(None).unwrap().is_none());

        backend
            .save_state(&state(1), "v1", &SaveMetadata::for_action("ADD"))
            .unwrap();
        let meta = backend
            .save_state(&state(2), "v2", &SaveMetadata::default())
            .unwrap();
        assert!(meta.compressed);

        assert_eq!(latest_flags(&backend), vec!["v2"]);
        assert_eq!(backend.load_state(None).unwrap().unwrap().state, state(2));
        let first = backend.load_state(Some("v1")).unwrap().unwrap();
        assert_eq!(first.state, state(1));
        assert_eq!(first.metadata.action_type.as_deref(), Some("ADD"));
        assert!(matches!(
            backend.load_state(Some("nope")),
            Err(StoreError::VersionNotFound(_))
        ));
    }

    #[test]
    fn test_delete_moves_latest() {
        let backend = SqliteBackend::open(SqliteBackendConfig::in_memory()).unwrap();
        for i in 1..=3 {
            backend
                .save_state(&state(i), &format!("v{}", i), &SaveMetadata::default())
                .unwrap();
        }

        assert!(backend.delete_version("v3").unwrap());
        assert!(!backend.delete_version("v3").unwrap());
        assert_eq!(latest_flags(&backend), vec!["v2"]);
        assert_eq!(backend.list_versions().unwrap(), vec!["v1", "v2"]);

        assert_eq!(backend.prune_old_versions(1).unwrap(), 1);
        assert_eq!(backend.list_versions().unwrap(), vec!["v2"]);
        assert!(backend.get_metadata("v1").unwrap().is_none());
    }

    #[test]
    fn test_resave_same_version() {
        let backend = SqliteBackend::open(SqliteBackendConfig::in_memory()).unwrap();
        backend.save_state(&state(1), "v1", &SaveMetadata::default()).unwrap();
        backend.save_state(&state(9), "v1", &SaveMetadata::default()).unwrap();
        assert_eq!(backend.list_versions().unwrap(), vec!["v1"]);
        assert_eq!(backend.load_state(Some("v1")).unwrap().unwrap().state, state(9));
    }

    #[test]
    fn test_file_database_reopens() {
        let dir = TempDir::new().unwrap();
        let config = SqliteBackendConfig::new(dir.path().join("db/state.db"));
        {
            let backend = SqliteBackend::open(config.clone()).unwrap();
            backend.save_state(&state(5), "v1", &SaveMetadata::default()).unwrap();
            backend.close().unwrap();
            assert!(matches!(
                backend.list_versions(),
                Err(StoreError::NotInitialized)
            ));
        }
        let backend = SqliteBackend::open(config).unwrap();
        assert_eq!(backend.load_state(None).unwrap().unwrap().state, state(5));
    }

    #[test]
    fn test_tampered_row_fails_integrity() {
        let backend = SqliteBackend::open(SqliteBackendConfig {
            compression: false,
            ..SqliteBackendConfig::in_memory()
        })
        .unwrap();
        backend.save_state(&state(1), "v1", &SaveMetadata::default()).unwrap();
        backend
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE states SET state_data = ?1 WHERE version = 'v1'",
                    params![b"{}".to_vec()],
                )?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            backend.load_state(Some("v1")),
            Err(StoreError::Integrity { .. })
        ));
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let backend = SqliteBackend::open(SqliteBackendConfig::in_memory()).unwrap();
        backend.save_state(&state(1), "v1", &SaveMetadata::default()).unwrap();

        // Fail the second statement of the transaction, after the states upsert
        backend
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_v2 BEFORE INSERT ON metadata
                     WHEN NEW.version = 'v2'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            backend.save_state(&state(2), "v2", &SaveMetadata::default()),
            Err(StoreError::Sql(_))
        ));

        assert_eq!(backend.list_versions().unwrap(), vec!["v1"]);
        assert_eq!(latest_flags(&backend), vec!["v1"]);
        assert_eq!(backend.load_state(None).unwrap().unwrap().state, state(1));
        assert!(backend.get_metadata("v2").unwrap().is_none());
        let orphaned: i64 = backend
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM states WHERE version = 'v2'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(orphaned, 0);

        // The connection is still usable afterwards
        backend.save_state(&state(3), "v3", &SaveMetadata::default()).unwrap();
        assert_eq!(latest_flags(&backend), vec!["v3"]);
    }
}
