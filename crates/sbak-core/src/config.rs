use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration (loaded from sbak.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SbakConfig {
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub backup: BackupConfig,
    pub log: LogConfig,
}

/// Which OpenDAL service backs the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local directory (`root`)
    Fs,
    /// S3-compatible endpoint
    S3,
    /// In-process memory, lost on exit (tests and dry runs)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix under which chunks/ and manifests/ live
    pub prefix: String,
    /// Refuse plaintext HTTP endpoints for S3
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iteration count
    pub kdf_iterations: u32,
    /// Length of the random per-backup salt in bytes
    pub salt_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Default chunk size in MiB
    pub chunk_size_mb: u64,
    /// Hash-chained ledger file
    pub ledger_path: PathBuf,
    /// Directory for local manifest copies (none = remote only)
    pub manifest_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl BackupConfig {
    pub fn chunk_size_bytes(&self) -> usize {
        (self.chunk_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("data/store"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "sbak".into(),
            prefix: "backups".into(),
            enforce_tls: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: 100_000,
            salt_len: 16,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: 16,
            ledger_path: PathBuf::from("data/ledger.json"),
            manifest_dir: Some(PathBuf::from("data/manifests")),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
