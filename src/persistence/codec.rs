//! Serialized form of persisted states.

use super::{SaveMetadata, VersionMetadata};
use crate::codec::{gunzip, gzip};
use crate::error::{Result, StoreError};
use crate::state::State;
use crate::types::{Checksum, Timestamp};

/// A state ready to be written.
#[derive(Clone, Debug)]
pub struct EncodedState {
    /// Bytes to store (gzipped when `compressed`).
    pub bytes: Vec<u8>,
    /// Length of the plain JSON.
    pub size_bytes: usize,
    pub compressed: bool,
    /// SHA-256 hex of the plain JSON.
    pub checksum: String,
}

impl EncodedState {
    /// Metadata record for this encoding.
    pub fn metadata(&self, version: &str, meta: &SaveMetadata) -> VersionMetadata {
        let compressed_size = self.bytes.len();
        VersionMetadata {
            version: version.to_string(),
            timestamp: Timestamp::now(),
            action_type: meta.action_type.clone(),
            size_bytes: self.size_bytes,
            compressed_size,
            compression_ratio: if self.size_bytes == 0 {
                1.0
            } else {
                compressed_size as f64 / self.size_bytes as f64
            },
            checksum: self.checksum.clone(),
            compressed: self.compressed,
            schema_version: meta.effective_schema_version(),
            user: meta.user.clone(),
        }
    }
}

/// Serialize a state to JSON, gzipping it when `compress` is set and the
/// JSON is at least `threshold` bytes.
pub fn encode_state(state: &State, compress: bool, threshold: usize) -> Result<EncodedState> {
    let json = serde_json::to_vec(state)?;
    let checksum = Checksum::from_bytes(&json).to_hex();
    let size_bytes = json.len();

    if compress && size_bytes >= threshold {
        Ok(EncodedState {
            bytes: gzip(&json)?,
            size_bytes,
            compressed: true,
            checksum,
        })
    } else {
        Ok(EncodedState {
            bytes: json,
            size_bytes,
            compressed: false,
            checksum,
        })
    }
}

/// Decode stored bytes and verify them against `expected_checksum`.
pub fn decode_state(
    bytes: &[u8],
    compressed: bool,
    expected_checksum: &str,
    version: &str,
) -> Result<State> {
    let json = if compressed {
        gunzip(bytes)?
    } else {
        bytes.to_vec()
    };

    let got = Checksum::from_bytes(&json).to_hex();
    if got != expected_checksum {
        return Err(StoreError::Integrity {
            id: version.to_string(),
            expected: expected_checksum.to_string(),
            got,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
