//! sbak-crypto: passphrase-derived chunk encryption
//!
//! Pipeline: passphrase → PBKDF2-HMAC-SHA256 → data key → AES-256-GCM per chunk
//!
//! ```text
//! Data Key (256-bit, PBKDF2 from passphrase + per-backup random salt)
//!   └── Chunk AEAD: AES-256-GCM (nonce=random_96bit, AAD=chunk_id as u64 BE)
//!       stored blob = nonce(12) || ciphertext(N) || tag(16)
//! ```

pub mod cipher;
pub mod kdf;

pub use cipher::{chunk_aad, AeadCipher, CipherResult};
pub use kdf::{derive_key, DerivedKey, KdfParams};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
