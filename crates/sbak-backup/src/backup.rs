//! Backup protocol: file → encrypted chunks in the store → manifest → ledger
//!
//! Per chunk, strictly in order:
//!   read → encrypt (AAD = chunk id) → blob = nonce || ct || tag
//!        → digest = SHA256(id || blob) → upload blob → descriptor
//!
//! Then: Merkle root over the digests → manifest → upload manifest → ledger
//! append → optional local manifest copy.
//!
//! Any error before the ledger append aborts the backup. Chunks already
//! uploaded stay orphaned in the store with no manifest or ledger entry
//! pointing at them.

use std::path::{Path, PathBuf};

use chrono::Utc;
use secrecy::SecretString;
use tracing::{debug, info, warn};

use sbak_chunks::{blob_digest, compute_root, Chunker, DEFAULT_CHUNK_SIZE};
use sbak_core::{SbakConfig, SbakError, SbakResult};
use sbak_crypto::kdf::{DEFAULT_ITERATIONS, DEFAULT_SALT_LEN};
use sbak_crypto::{chunk_aad, derive_key, AeadCipher, KdfParams};
use sbak_storage::BlobStore;

use crate::ledger::Ledger;
use crate::manifest::{
    format_timestamp, manifest_object_name, ChunkDescriptor, KdfDescriptor, Manifest,
    MANIFEST_VERSION,
};
use crate::ProgressFn;

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub chunk_size: usize,
    pub kdf_iterations: u32,
    pub salt_len: usize,
    /// Where to drop a local copy of the manifest (none = store only)
    pub manifest_dir: Option<PathBuf>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf_iterations: DEFAULT_ITERATIONS,
            salt_len: DEFAULT_SALT_LEN,
            manifest_dir: None,
        }
    }
}

impl BackupOptions {
    pub fn from_config(config: &SbakConfig) -> Self {
        Self {
            chunk_size: config.backup.chunk_size_bytes(),
            kdf_iterations: config.crypto.kdf_iterations,
            salt_len: config.crypto.salt_len,
            manifest_dir: config.backup.manifest_dir.clone(),
        }
    }
}

/// Result of a completed backup
#[derive(Debug)]
pub struct BackupOutcome {
    pub manifest: Manifest,
    pub manifest_uri: String,
    pub ledger_entry_hash: String,
    /// Local manifest copy, if one was written
    pub local_manifest: Option<PathBuf>,
}

/// Back up a single file.
pub async fn backup_file(
    store: &BlobStore,
    ledger: &mut Ledger,
    path: &Path,
    passphrase: &SecretString,
    opts: &BackupOptions,
    progress: Option<&ProgressFn>,
) -> SbakResult<BackupOutcome> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SbakError::InvalidParams(format!("not a file path: {}", path.display())))?;

    let mut chunker = Chunker::open(path, opts.chunk_size)?;
    let total_bytes = std::fs::metadata(path)?.len();
    let backup_id = Utc::now().timestamp_millis().to_string();

    info!(
        path = %path.display(),
        bytes = total_bytes,
        chunk_size = opts.chunk_size,
        backup_id = %backup_id,
        "backup started"
    );

    // Fresh salt per backup; recorded in the manifest for restore
    let params = KdfParams::generate(opts.salt_len, opts.kdf_iterations)?;
    let cipher = {
        let key = derive_key(passphrase, &params)?;
        AeadCipher::new(&key)?
    };

    let mut descriptors = Vec::new();
    while chunker.has_next() {
        let chunk = chunker.next_chunk()?;
        let id = chunk.id;

        let sealed = cipher.encrypt_with_aad(&chunk.bytes, &chunk_aad(id))?;
        let nonce = hex::encode(sealed.nonce);
        let blob = sealed.to_blob();
        let digest = blob_digest(id, &blob);

        let name = format!("{file_name}.chunk{id}.enc");
        let uri = store.put_chunk(&backup_id, &name, blob).await?;
        debug!(chunk = id, size = chunk.size(), uri = %uri, "chunk stored");

        descriptors.push(ChunkDescriptor {
            id,
            digest,
            nonce,
            uri,
        });

        if let Some(cb) = progress {
            cb(
                chunker.bytes_read(),
                total_bytes,
                &format!("chunk {id}"),
            );
        }
    }

    let original_size = chunker.bytes_read();
    if original_size != total_bytes {
        warn!(
            expected = total_bytes,
            read = original_size,
            "file size changed during backup"
        );
    }

    let digests: Vec<&str> = descriptors.iter().map(|d| d.digest.as_str()).collect();
    let merkle_root = compute_root(&digests);

    let manifest = Manifest {
        file_name,
        original_size,
        chunk_size: opts.chunk_size as u64,
        merkle_root,
        timestamp: format_timestamp(&Utc::now()),
        version: MANIFEST_VERSION,
        chunks: descriptors,
        kdf: Some(KdfDescriptor::from_params(&params)),
    };

    let json = manifest.to_json()?;
    let manifest_name = manifest_object_name(&backup_id);
    let manifest_uri = store.put_manifest(&manifest_name, &json).await?;

    let ledger_entry_hash = ledger.append_event(serde_json::to_value(&manifest)?)?;

    // The backup is complete at this point; a failed local copy is only reported
    let local_manifest = match &opts.manifest_dir {
        Some(dir) => match write_local_copy(dir, &manifest_name, &json).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "could not write local manifest copy");
                None
            }
        },
        None => None,
    };

    info!(
        file = %manifest.file_name,
        chunks = manifest.chunks.len(),
        bytes = manifest.original_size,
        merkle_root = %manifest.merkle_root,
        manifest = %manifest_uri,
        "backup complete"
    );

    Ok(BackupOutcome {
        manifest,
        manifest_uri,
        ledger_entry_hash,
        local_manifest,
    })
}

async fn write_local_copy(dir: &Path, name: &str, json: &str) -> SbakResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}
