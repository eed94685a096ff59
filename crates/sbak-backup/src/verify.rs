//! Verify protocol: re-download every chunk of a manifest and recompute its
//! Merkle root.
//!
//! The ledger chain is checked first but only as an advisory signal; the
//! manifest's own Merkle root is the authoritative check. Each chunk's digest
//! is compared on its own before aggregation, so a bad blob is reported by
//! chunk id rather than only as a root mismatch.

use std::path::Path;

use tracing::{debug, info, warn};

use sbak_chunks::{blob_digest, compute_root};
use sbak_core::{SbakError, SbakResult};
use sbak_storage::{BlobStore, URI_SCHEME};

use crate::ledger::{Ledger, LoadStatus};
use crate::manifest::{ChunkDescriptor, Manifest};
use crate::ProgressFn;

/// Ledger state observed during verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Intact,
    /// First entry that fails its link or hash check
    Broken { index: usize },
    /// No usable ledger to check against
    Unavailable { reason: String },
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub file_name: String,
    pub chunks_verified: usize,
    pub merkle_root: String,
    pub chain: ChainStatus,
    /// Whether the ledger records a backup with this root
    pub root_in_ledger: bool,
}

/// Load a manifest from a `store://` URI or a local file path.
pub async fn load_manifest(store: &BlobStore, source: &str) -> SbakResult<Manifest> {
    let bytes = if source.starts_with(URI_SCHEME) {
        store.get(source).await?
    } else {
        let path = Path::new(source);
        tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SbakError::NotFound(path.display().to_string()),
            _ => SbakError::Io(e),
        })?
    };
    Manifest::from_slice(&bytes)
}

/// Check the ledger without failing on it.
pub fn chain_status(ledger: Option<&Ledger>) -> ChainStatus {
    let Some(ledger) = ledger else {
        return ChainStatus::Unavailable {
            reason: "no ledger".into(),
        };
    };
    if let LoadStatus::Recovered { reason } = ledger.load_status() {
        return ChainStatus::Unavailable {
            reason: reason.clone(),
        };
    }
    match ledger.first_broken_entry() {
        None => ChainStatus::Intact,
        Some(index) => ChainStatus::Broken { index },
    }
}

/// Descriptors must be listed in id order starting at 0.
pub(crate) fn check_descriptor_order(chunks: &[ChunkDescriptor]) -> SbakResult<()> {
    for (pos, chunk) in chunks.iter().enumerate() {
        if chunk.id != pos as u64 {
            return Err(SbakError::Format(format!(
                "manifest chunk at position {pos} has id {}",
                chunk.id
            )));
        }
    }
    Ok(())
}

/// Download one chunk and check it against its descriptor. Returns the blob
/// and its recomputed digest.
pub(crate) async fn fetch_verified(
    store: &BlobStore,
    chunk: &ChunkDescriptor,
) -> SbakResult<(Vec<u8>, String)> {
    let blob = store.get(&chunk.uri).await?;
    if blob.is_empty() {
        return Err(SbakError::Integrity(format!(
            "chunk {}: empty download from {}",
            chunk.id, chunk.uri
        )));
    }

    let digest = blob_digest(chunk.id, &blob);
    if digest != chunk.digest {
        return Err(SbakError::Integrity(format!(
            "chunk {}: digest mismatch (manifest {}, stored blob {})",
            chunk.id, chunk.digest, digest
        )));
    }
    Ok((blob, digest))
}

/// Verify every chunk of `manifest` against the store.
pub async fn verify_manifest(
    store: &BlobStore,
    ledger: Option<&Ledger>,
    manifest: &Manifest,
    progress: Option<&ProgressFn>,
) -> SbakResult<VerifyReport> {
    let chain = chain_status(ledger);
    match &chain {
        ChainStatus::Intact => debug!("ledger chain intact"),
        ChainStatus::Broken { index } => warn!(
            entry = *index,
            "ledger chain verification failed; continuing with Merkle check"
        ),
        ChainStatus::Unavailable { reason } => {
            warn!(reason = %reason, "ledger chain not checked")
        }
    }

    check_descriptor_order(&manifest.chunks)?;

    let total = manifest.chunks.len() as u64;
    let mut digests = Vec::with_capacity(manifest.chunks.len());
    for chunk in &manifest.chunks {
        let (_, digest) = fetch_verified(store, chunk).await?;
        digests.push(digest);
        debug!(chunk = chunk.id, "chunk digest ok");

        if let Some(cb) = progress {
            cb(chunk.id + 1, total, &format!("chunk {}/{total}", chunk.id + 1));
        }
    }

    let computed = compute_root(&digests);
    if computed != manifest.merkle_root {
        return Err(SbakError::Integrity(format!(
            "merkle root mismatch: manifest {}, computed {}",
            display_root(&manifest.merkle_root),
            display_root(&computed)
        )));
    }

    let root_in_ledger = ledger.is_some_and(|l| l.contains_root(&manifest.merkle_root));
    info!(
        file = %manifest.file_name,
        chunks = manifest.chunks.len(),
        merkle_root = %manifest.merkle_root,
        root_in_ledger,
        "verify complete: merkle root matches"
    );

    Ok(VerifyReport {
        file_name: manifest.file_name.clone(),
        chunks_verified: manifest.chunks.len(),
        merkle_root: computed,
        chain,
        root_in_ledger,
    })
}

fn display_root(root: &str) -> &str {
    if root.is_empty() {
        "<empty>"
    } else {
        root
    }
}
