//! Restore protocol: manifest → verified chunks → decrypted file
//!
//! Every blob is checked against its descriptor digest before decryption and
//! decrypted with its chunk id as AAD. Plaintext goes to a hidden temp file
//! next to the target, which is renamed into place only after the Merkle root
//! and total size match the manifest.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use zeroize::Zeroize;

use sbak_chunks::compute_root;
use sbak_core::{SbakError, SbakResult};
use sbak_crypto::{chunk_aad, derive_key, AeadCipher, CipherResult};
use sbak_storage::BlobStore;

use crate::manifest::Manifest;
use crate::verify::{check_descriptor_order, fetch_verified};
use crate::ProgressFn;

#[derive(Debug)]
pub struct RestoreOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    pub chunks: usize,
}

/// Removes the temp file unless the restore completed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// The manifest's file name, refused if it could escape `out_dir`.
fn output_name(manifest: &Manifest) -> SbakResult<&str> {
    let name = manifest.file_name.as_str();
    let is_plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if !is_plain {
        return Err(SbakError::Format(format!(
            "manifest file name is not a plain file name: {name:?}"
        )));
    }
    Ok(name)
}

/// Restore the file described by `manifest` into `out_dir`.
pub async fn restore_file(
    store: &BlobStore,
    manifest: &Manifest,
    passphrase: &SecretString,
    out_dir: &Path,
    progress: Option<&ProgressFn>,
) -> SbakResult<RestoreOutcome> {
    let kdf = manifest.kdf.as_ref().ok_or_else(|| {
        SbakError::InvalidParams(
            "manifest carries no key-derivation parameters; it cannot be restored".into(),
        )
    })?;
    let params = kdf.to_params()?;
    check_descriptor_order(&manifest.chunks)?;
    let name = output_name(manifest)?;

    let cipher = {
        let key = derive_key(passphrase, &params)?;
        AeadCipher::new(&key)?
    };

    tokio::fs::create_dir_all(out_dir).await?;
    let target = out_dir.join(name);
    let mut guard = TempFileGuard {
        path: out_dir.join(format!(".{name}.sbak-tmp")),
        armed: true,
    };
    let mut file = tokio::fs::File::create(&guard.path).await?;

    info!(
        file = %name,
        chunks = manifest.chunks.len(),
        target = %target.display(),
        "restore started"
    );

    let total = manifest.original_size;
    let mut written = 0u64;
    let mut digests = Vec::with_capacity(manifest.chunks.len());

    for chunk in &manifest.chunks {
        let (blob, digest) = fetch_verified(store, chunk).await?;

        let sealed = CipherResult::from_blob(&blob)?;
        if hex::encode(sealed.nonce) != chunk.nonce {
            return Err(SbakError::Integrity(format!(
                "chunk {}: stored nonce does not match manifest",
                chunk.id
            )));
        }

        let mut plaintext = cipher.decrypt_with_aad(&sealed, &chunk_aad(chunk.id))?;
        let write_result = file.write_all(&plaintext).await;
        written += plaintext.len() as u64;
        plaintext.zeroize();
        write_result?;

        digests.push(digest);
        debug!(chunk = chunk.id, bytes = written, "chunk restored");

        if let Some(cb) = progress {
            cb(written, total, &format!("chunk {}", chunk.id));
        }
    }

    let computed = compute_root(&digests);
    if computed != manifest.merkle_root {
        return Err(SbakError::Integrity(format!(
            "merkle root mismatch: manifest {}, computed {}",
            manifest.merkle_root, computed
        )));
    }
    if written != manifest.original_size {
        return Err(SbakError::Integrity(format!(
            "restored {written} bytes, manifest records {}",
            manifest.original_size
        )));
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&guard.path, &target).await?;
    guard.armed = false;

    info!(
        file = %name,
        bytes = written,
        path = %target.display(),
        "restore complete"
    );

    Ok(RestoreOutcome {
        path: target,
        bytes: written,
        chunks: manifest.chunks.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_VERSION;

    fn manifest_named(file_name: &str) -> Manifest {
        Manifest {
            file_name: file_name.into(),
            original_size: 0,
            chunk_size: 16,
            merkle_root: String::new(),
            timestamp: "2024-01-01T00:00:00Z".into(),
            version: MANIFEST_VERSION,
            chunks: Vec::new(),
            kdf: None,
        }
    }

    #[test]
    fn output_name_rejects_paths() {
        assert_eq!(output_name(&manifest_named("notes.txt")).unwrap(), "notes.txt");
        for bad in ["../etc/passwd", "a/b.txt", "/abs.txt", "..", ""] {
            let err = output_name(&manifest_named(bad)).unwrap_err();
            assert!(matches!(err, SbakError::Format(_)), "{bad:?}");
        }
    }

    #[test]
    fn temp_guard_removes_file_unless_disarmed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("partial");

        std::fs::write(&path, b"partial").unwrap();
        drop(TempFileGuard {
            path: path.clone(),
            armed: true,
        });
        assert!(!path.exists());

        std::fs::write(&path, b"done").unwrap();
        drop(TempFileGuard {
            path: path.clone(),
            armed: false,
        });
        assert!(path.exists());
    }
}
