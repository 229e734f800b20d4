//! On-disk snapshot storage: one file per snapshot.

use super::Snapshot;
use crate::error::{Result, StoreError};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"SNP\0";

/// Current snapshot file format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Magic, version byte and body length.
const HEADER_LEN: u64 = 4 + 1 + 8;

const CRC_LEN: u64 = 4;

/// File extension for snapshot files.
const SNAPSHOT_EXT: &str = "snap";

/// Directory of snapshot files.
///
/// File layout: magic, version byte, body length (u64 LE), MessagePack
/// body, CRC32 of the body (u32 LE).
pub struct SnapshotStorage {
    path: PathBuf,
}

impl SnapshotStorage {
    /// Open (creating if needed) a storage directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_path(&self, id: &str) -> PathBuf {
        self.path.join(format!("{}.{}", id, SNAPSHOT_EXT))
    }

    /// Write a snapshot, replacing any previous file for the same id.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let body = rmp_serde::to_vec_named(snapshot)?;

        let final_path = self.file_path(&snapshot.id);
        let temp_path = final_path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&[SNAPSHOT_VERSION])?;
            file.write_all(&(body.len() as u64).to_le_bytes())?;
            file.write_all(&body)?;
            file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    /// Read one snapshot file.
    pub fn read(&self, id: &str) -> Result<Option<Snapshot>> {
        let path = self.file_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_file(&path).map(Some)
    }

    fn read_file(path: &Path) -> Result<Snapshot> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "Invalid snapshot magic in {}",
                path.display()
            )));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        // Body plus trailing CRC must fill the rest of the file
        let remaining = file.metadata()?.len().saturating_sub(HEADER_LEN);
        if len.checked_add(CRC_LEN) != Some(remaining) {
            return Err(StoreError::InvalidFormat(format!(
                "Snapshot body length {} does not match file size in {}",
                len,
                path.display()
            )));
        }

        let mut body = vec![0u8; len as usize];
        file.read_exact(&mut body)?;

        let mut crc_bytes = [0u8; 4];
        file.read_exact(&mut crc_bytes)?;
        let stored = u32::from_le_bytes(crc_bytes);
        let computed = crc32fast::hash(&body);
        if stored != computed {
            return Err(StoreError::Integrity {
                id: path.display().to_string(),
                expected: format!("{:08x}", stored),
                got: format!("{:08x}", computed),
            });
        }

        Ok(rmp_serde::from_slice(&body)?)
    }

    /// Delete a snapshot file. Returns false if it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.file_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Load every readable snapshot, oldest first. Unreadable files are
    /// skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            match Self::read_file(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot file");
                }
            }
        }
        snapshots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshots::{Compression, SnapshotType};
    use crate::types::{Checksum, Timestamp};
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn sample(id: &str) -> Snapshot {
        let payload = b"payload bytes".to_vec();
        Snapshot {
            id: id.to_string(),
            timestamp: Timestamp::now(),
            checksum: Checksum::from_bytes(&payload).to_hex(),
            size_bytes: payload.len(),
            payload,
            snapshot_type: SnapshotType::Full,
            compression: Compression::None,
            parent_id: None,
            tags: BTreeSet::from(["type:full".to_string()]),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();

        let snapshot = sample("s1");
        storage.write(&snapshot).unwrap();
        assert_eq!(storage.read("s1").unwrap(), Some(snapshot));

        assert!(storage.delete("s1").unwrap());
        assert!(!storage.delete("s1").unwrap());
        assert_eq!(storage.read("s1").unwrap(), None);
    }

    #[test]
    fn test_load_all_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        storage.write(&sample("a")).unwrap();
        storage.write(&sample("b")).unwrap();

        // Flip a byte inside the body of "b"
        let path = dir.path().join("b.snap");
        let mut bytes = fs::read(&path).unwrap();
        bytes[20] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let loaded = storage.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a");
        assert!(matches!(
            storage.read("b"),
            Err(StoreError::Integrity { .. })
        ));
    }

    #[test]
    fn test_oversized_length_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        storage.write(&sample("a")).unwrap();
        storage.write(&sample("b")).unwrap();

        // Top byte of the little-endian body length
        let path = dir.path().join("b.snap");
        let mut bytes = fs::read(&path).unwrap();
        bytes[12] = 0x7f;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            storage.read("b"),
            Err(StoreError::InvalidFormat(_))
        ));
        let loaded = storage.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a");
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        storage.write(&sample("a")).unwrap();

        let path = dir.path().join("a.snap");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 6]).unwrap();

        assert!(matches!(
            storage.read("a"),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
