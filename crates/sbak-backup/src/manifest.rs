//! Backup manifest: the JSON record of one backup.
//!
//! ```json
//! {
//!   "file_name": "photo.raw",
//!   "original_size": 50331648,
//!   "chunk_size": 16777216,
//!   "merkle_root": "…",
//!   "timestamp": "2024-01-01T00:00:00Z",
//!   "version": 1,
//!   "chunks": [{ "id": 0, "hash": "…", "iv": "…", "uri": "store://…" }],
//!   "kdf": { "salt": "…", "iterations": 100000, "key_length": 32 }
//! }
//! ```
//!
//! Unknown fields are ignored on read. `kdf` is omitted when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sbak_core::{SbakError, SbakResult};
use sbak_crypto::KdfParams;

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// One stored chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub id: u64,
    /// Integrity digest of the exact blob stored at `uri` (hex)
    #[serde(rename = "hash")]
    pub digest: String,
    /// AES-GCM nonce (hex)
    #[serde(rename = "iv")]
    pub nonce: String,
    pub uri: String,
}

/// Key-derivation parameters needed to re-derive the data key on restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfDescriptor {
    /// Salt (hex)
    pub salt: String,
    pub iterations: u32,
    pub key_length: u32,
}

impl KdfDescriptor {
    pub fn from_params(params: &KdfParams) -> Self {
        Self {
            salt: hex::encode(params.salt()),
            iterations: params.iterations(),
            key_length: params.key_length(),
        }
    }

    pub fn to_params(&self) -> SbakResult<KdfParams> {
        let salt = hex::decode(&self.salt)
            .map_err(|e| SbakError::Format(format!("manifest kdf salt is not hex: {e}")))?;
        KdfParams::new(salt, self.iterations, self.key_length)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub file_name: String,
    pub original_size: u64,
    pub chunk_size: u64,
    pub merkle_root: String,
    /// RFC 3339 UTC, second precision
    pub timestamp: String,
    pub version: u32,
    /// Ordered by id
    pub chunks: Vec<ChunkDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfDescriptor>,
}

impl Manifest {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> SbakResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> SbakResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse manifest bytes (as fetched from the store or read from disk).
    pub fn from_slice(data: &[u8]) -> SbakResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| SbakError::Format(format!("manifest is not UTF-8: {e}")))?;
        Self::from_json(text)
    }

    /// Ordered per-chunk digests, the input to the Merkle root.
    pub fn digests(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.digest.as_str()).collect()
    }
}

/// Object name for a manifest in the store: `manifest_<backup_id>.json`
pub fn manifest_object_name(backup_id: &str) -> String {
    format!("manifest_{backup_id}.json")
}

/// `2024-01-01T00:00:00Z`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
