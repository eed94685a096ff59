//! sbak-backup: manifests, the hash-chained ledger, and the end-to-end protocols
//!
//! - `manifest`: serializable record of one backup
//! - `ledger`: append-only, hash-chained log of backup events
//! - `backup`: chunk → encrypt → digest → upload → Merkle root → manifest → ledger
//! - `verify`: manifest → download → re-digest → Merkle root comparison
//! - `restore`: manifest → download → verify → decrypt → reassemble
//! - `delete`: manifest → remove chunks → remove manifest → ledger event

pub mod backup;
pub mod delete;
pub mod ledger;
pub mod manifest;
pub mod restore;
pub mod verify;

pub use backup::{backup_file, BackupOptions, BackupOutcome};
pub use delete::{delete_backup, DeleteOutcome};
pub use ledger::{Ledger, LedgerEntry, LoadStatus, GENESIS_HASH};
pub use manifest::{ChunkDescriptor, KdfDescriptor, Manifest, MANIFEST_VERSION};
pub use restore::{restore_file, RestoreOutcome};
pub use verify::{load_manifest, verify_manifest, ChainStatus, VerifyReport};

/// Progress callback type (done, total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;
