//! SHA-256 integrity digests, rendered as lowercase hex

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a byte slice (64 chars)
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Integrity digest of one stored chunk blob (`nonce || ciphertext || tag`).
///
/// The chunk id is hashed in front of the blob as 8 big-endian bytes, so a
/// blob swapped into another descriptor's slot no longer matches its digest.
pub fn blob_digest(chunk_id: u64, blob: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk_id.to_be_bytes());
    hasher.update(blob);
    hex::encode(hasher.finalize())
}
