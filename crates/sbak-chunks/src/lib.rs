//! sbak-chunks: fixed-size chunking, SHA-256 integrity digests, and Merkle roots
//!
//! # Overview
//! - `chunker`: lazy, order-preserving split of a byte stream into fixed-size chunks
//! - `digest`: hex SHA-256 helpers, including the per-chunk blob digest
//! - `merkle`: domain-separated Merkle root over an ordered digest list, with inclusion proofs

pub mod chunker;
pub mod digest;
pub mod merkle;

pub use chunker::{Chunk, Chunker, DEFAULT_CHUNK_SIZE};
pub use digest::{blob_digest, sha256_hex};
pub use merkle::{compute_root, verify_proof, MerkleProof, MerkleTree, ProofStep};
