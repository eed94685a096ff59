//! Delete protocol: remove one backup's chunks and manifest from the store.
//!
//! Every chunk URI is checked to lie under this store's chunk directory
//! before anything is removed. Chunks go first and the manifest last, so an
//! interrupted delete leaves a manifest that can be deleted again. The ledger
//! records a `delete` event without a `merkle_root` field; the backup's own
//! entry stays in the chain.

use serde_json::json;
use tracing::{debug, info};

use sbak_core::{SbakError, SbakResult};
use sbak_storage::BlobStore;

use crate::ledger::Ledger;
use crate::verify::load_manifest;

#[derive(Debug)]
pub struct DeleteOutcome {
    pub file_name: String,
    pub chunks_deleted: usize,
    /// Root of the deleted backup
    pub merkle_root: String,
    pub ledger_entry_hash: String,
}

/// Delete the backup whose manifest lives at `manifest_uri`.
pub async fn delete_backup(
    store: &BlobStore,
    ledger: &mut Ledger,
    manifest_uri: &str,
) -> SbakResult<DeleteOutcome> {
    if !store.is_manifest_uri(manifest_uri) {
        return Err(SbakError::InvalidParams(format!(
            "not a manifest in this store: {manifest_uri}"
        )));
    }
    let manifest = load_manifest(store, manifest_uri).await?;

    if let Some(foreign) = manifest.chunks.iter().find(|c| !store.is_chunk_uri(&c.uri)) {
        return Err(SbakError::Format(format!(
            "chunk {} points outside this store's chunks: {}",
            foreign.id, foreign.uri
        )));
    }

    info!(
        manifest = %manifest_uri,
        file = %manifest.file_name,
        chunks = manifest.chunks.len(),
        "delete started"
    );

    for chunk in &manifest.chunks {
        store.delete(&chunk.uri).await?;
        debug!(chunk = chunk.id, uri = %chunk.uri, "chunk deleted");
    }
    store.delete(manifest_uri).await?;

    let ledger_entry_hash = ledger.append_event(json!({
        "event": "delete",
        "manifest": manifest_uri,
        "file_name": manifest.file_name,
        "chunks": manifest.chunks.len(),
        "deleted_root": manifest.merkle_root,
    }))?;

    info!(
        manifest = %manifest_uri,
        chunks = manifest.chunks.len(),
        "delete complete"
    );

    Ok(DeleteOutcome {
        file_name: manifest.file_name,
        chunks_deleted: manifest.chunks.len(),
        merkle_root: manifest.merkle_root,
        ledger_entry_hash,
    })
}
