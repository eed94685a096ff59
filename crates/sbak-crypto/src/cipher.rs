//! Per-chunk AES-256-GCM encryption/decryption
//!
//! Stored blob format (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! AAD = chunk_id (8 bytes, big-endian)
//! ```
//!
//! The AAD binds each blob to its position in the backup, so a blob moved to
//! another chunk slot fails authentication on restore.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use sbak_core::{SbakError, SbakResult};

use crate::kdf::DerivedKey;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Output of one encryption call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherResult {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl CipherResult {
    /// The exact bytes that get stored: `nonce || ciphertext || tag`
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len() + TAG_SIZE);
        blob.extend_from_slice(&self.nonce);
        blob.extend_from_slice(&self.ciphertext);
        blob.extend_from_slice(&self.tag);
        blob
    }

    /// Split a stored blob back into its parts.
    pub fn from_blob(blob: &[u8]) -> SbakResult<Self> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SbakError::Format(format!(
                "encrypted blob too short: {} bytes (minimum {})",
                blob.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }

        let (nonce_bytes, rest) = blob.split_at(NONCE_SIZE);
        let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_SIZE);

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }
}

/// Associated data for chunk `chunk_id`: the id as 8 big-endian bytes.
pub fn chunk_aad(chunk_id: u64) -> [u8; 8] {
    chunk_id.to_be_bytes()
}

/// AES-256-GCM bound to a single key for its whole lifetime.
///
/// The key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AeadCipher {
    key: [u8; KEY_SIZE],
}

impl AeadCipher {
    pub fn new(key: &DerivedKey) -> SbakResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(SbakError::InvalidParams(format!(
                "AES-256-GCM needs a {KEY_SIZE}-byte key, got {} bytes",
                key.len()
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(key.as_bytes());
        Ok(Self { key: bytes })
    }

    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Encrypt with a fresh random nonce and no associated data.
    pub fn encrypt(&self, plaintext: &[u8]) -> SbakResult<CipherResult> {
        self.encrypt_with_aad(plaintext, &[])
    }

    /// Encrypt with a fresh random nonce, authenticating `aad` alongside.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> SbakResult<CipherResult> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| SbakError::Crypto(format!("nonce generation failed: {e}")))?;

        let cipher = self.engine()?;
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer)
            .map_err(|e| {
                buffer.zeroize();
                SbakError::Crypto(format!("chunk encryption failed: {e}"))
            })?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);

        Ok(CipherResult {
            nonce,
            ciphertext: buffer,
            tag: tag_bytes,
        })
    }

    /// Decrypt a result produced by [`AeadCipher::encrypt`].
    pub fn decrypt(&self, sealed: &CipherResult) -> SbakResult<Vec<u8>> {
        self.decrypt_with_aad(sealed, &[])
    }

    /// Decrypt and authenticate. On tag mismatch nothing is returned and the
    /// working buffer is wiped.
    pub fn decrypt_with_aad(&self, sealed: &CipherResult, aad: &[u8]) -> SbakResult<Vec<u8>> {
        let cipher = self.engine()?;
        let mut buffer = sealed.ciphertext.clone();

        match cipher.decrypt_in_place_detached(
            Nonce::from_slice(&sealed.nonce),
            aad,
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        ) {
            Ok(()) => Ok(buffer),
            Err(_) => {
                buffer.zeroize();
                Err(SbakError::AuthenticationFailed(
                    "invalid key, corrupted data, or wrong chunk position".into(),
                ))
            }
        }
    }

    fn engine(&self) -> SbakResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| SbakError::Crypto(format!("cipher init failed: {e}")))
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
