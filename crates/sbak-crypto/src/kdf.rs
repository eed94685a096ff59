//! Key derivation: PBKDF2-HMAC-SHA256 passphrase → data key
//!
//! Zeroization is best-effort. `DerivedKey` wipes its buffer on drop and the
//! passphrase only ever lives inside a `SecretString`, which is wiped on drop
//! as well. Copies left behind by the terminal layer that read the passphrase,
//! or by a `String` that reallocated before it was wrapped, are out of reach.

use hmac::Hmac;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use sbak_core::{SbakError, SbakResult};

use crate::KEY_SIZE;

/// Default PBKDF2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Default length of a freshly generated salt
pub const DEFAULT_SALT_LEN: usize = 16;

/// A key derived from a passphrase. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey {
    bytes: Vec<u8>,
}

impl DerivedKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2 parameters. Validated on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    salt: Vec<u8>,
    iterations: u32,
    key_length: u32,
}

impl KdfParams {
    pub fn new(salt: Vec<u8>, iterations: u32, key_length: u32) -> SbakResult<Self> {
        if salt.is_empty() {
            return Err(SbakError::InvalidParams("salt must not be empty".into()));
        }
        if iterations == 0 {
            return Err(SbakError::InvalidParams(
                "iteration count must be greater than zero".into(),
            ));
        }
        if key_length == 0 {
            return Err(SbakError::InvalidParams(
                "key length must be greater than zero".into(),
            ));
        }
        Ok(Self {
            salt,
            iterations,
            key_length,
        })
    }

    /// Fresh parameters with a random salt from the OS RNG and a 256-bit key.
    pub fn generate(salt_len: usize, iterations: u32) -> SbakResult<Self> {
        let mut salt = vec![0u8; salt_len];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| SbakError::Crypto(format!("salt generation failed: {e}")))?;
        Self::new(salt, iterations, KEY_SIZE as u32)
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn key_length(&self) -> u32 {
        self.key_length
    }
}

/// Derive a key from a passphrase with PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same passphrase and params always yield the same key,
/// which is what lets a later restore decrypt chunks written by an earlier run.
pub fn derive_key(passphrase: &SecretString, params: &KdfParams) -> SbakResult<DerivedKey> {
    let secret = passphrase.expose_secret();
    if secret.is_empty() {
        return Err(SbakError::InvalidParams(
            "passphrase must not be empty".into(),
        ));
    }

    let mut key = vec![0u8; params.key_length as usize];
    if let Err(e) = pbkdf2::pbkdf2::<Hmac<Sha256>>(
        secret.as_bytes(),
        &params.salt,
        params.iterations,
        &mut key,
    ) {
        key.zeroize();
        return Err(SbakError::Crypto(format!("PBKDF2 derivation failed: {e}")));
    }

    tracing::debug!(
        iterations = params.iterations,
        key_length = params.key_length,
        "derived data key"
    );
    Ok(DerivedKey::from_bytes(key))
}
