//! Domain-separated Merkle tree over hex digest strings
//!
//! ```text
//! leaf = SHA256(0x00 || digest_hex)
//! node = SHA256(0x01 || left_hex || right_hex)
//! ```
//!
//! Nodes are carried between levels as lowercase hex text, and the last node
//! of an odd-sized level is paired with itself. An empty digest list has the
//! empty string as its root.

use sha2::{Digest, Sha256};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn hash_leaf(digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(digest.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_node(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

fn next_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| hash_node(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Merkle root of an ordered digest list. `""` for an empty list.
pub fn compute_root<S: AsRef<str>>(digests: &[S]) -> String {
    if digests.is_empty() {
        return String::new();
    }
    let mut level: Vec<String> = digests.iter().map(|d| hash_leaf(d.as_ref())).collect();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.swap_remove(0)
}

/// One sibling on the path from a leaf to the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: String,
    /// Sibling sits to the left of the running hash
    pub sibling_is_left: bool,
}

/// Inclusion proof for the leaf at `index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub index: usize,
    pub steps: Vec<ProofStep>,
}

/// A fully materialised tree; every level is kept so proofs can be produced.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// levels[0] holds the leaf hashes, the last level holds the root
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    pub fn build<S: AsRef<str>>(digests: &[S]) -> Self {
        if digests.is_empty() {
            return Self { levels: Vec::new() };
        }
        let mut levels = vec![digests
            .iter()
            .map(|d| hash_leaf(d.as_ref()))
            .collect::<Vec<_>>()];
        while levels.last().map_or(0, Vec::len) > 1 {
            let next = next_level(&levels[levels.len() - 1]);
            levels.push(next);
        }
        Self { levels }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Same value as [`compute_root`] over the digests the tree was built from.
    pub fn root(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_default()
    }

    /// Inclusion proof for leaf `index`, or `None` if out of range.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut pos = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if pos % 2 == 0 {
                // odd tail: the node is its own sibling
                let sibling = level.get(pos + 1).unwrap_or(&level[pos]);
                ProofStep {
                    sibling: sibling.clone(),
                    sibling_is_left: false,
                }
            } else {
                ProofStep {
                    sibling: level[pos - 1].clone(),
                    sibling_is_left: true,
                }
            };
            steps.push(step);
            pos /= 2;
        }

        Some(MerkleProof { index, steps })
    }
}

/// Check that `digest` is included under `root` according to `proof`.
pub fn verify_proof(root: &str, digest: &str, proof: &MerkleProof) -> bool {
    let mut running = hash_leaf(digest);
    let mut pos = proof.index;
    for step in &proof.steps {
        if step.sibling_is_left != (pos % 2 == 1) {
            return false;
        }
        running = if step.sibling_is_left {
            hash_node(&step.sibling, &running)
        } else {
            hash_node(&running, &step.sibling)
        };
        pos /= 2;
    }
    running == root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256_hex;
    use proptest::prelude::*;

    fn digests(n: usize) -> Vec<String> {
        (0..n).map(|i| sha256_hex(&i.to_be_bytes())).collect()
    }

    #[test]
    fn empty_root_is_empty_string() {
        assert_eq!(compute_root::<String>(&[]), "");
        assert_eq!(MerkleTree::build::<String>(&[]).root(), "");
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let d = sha256_hex(b"only chunk");
        let mut preimage = vec![0x00u8];
        preimage.extend_from_slice(d.as_bytes());

        assert_eq!(compute_root(&[d.clone()]), sha256_hex(&preimage));
    }

    #[test]
    fn two_leaf_root_matches_manual_construction() {
        let d = digests(2);
        let left = hash_leaf(&d[0]);
        let right = hash_leaf(&d[1]);
        let mut preimage = vec![0x01u8];
        preimage.extend_from_slice(left.as_bytes());
        preimage.extend_from_slice(right.as_bytes());

        assert_eq!(compute_root(&d), sha256_hex(&preimage));
    }

    #[test]
    fn odd_tail_is_paired_with_itself() {
        let d = digests(3);
        let l0 = hash_leaf(&d[0]);
        let l1 = hash_leaf(&d[1]);
        let l2 = hash_leaf(&d[2]);
        let expected = hash_node(&hash_node(&l0, &l1), &hash_node(&l2, &l2));

        assert_eq!(compute_root(&d), expected);
    }

    #[test]
    fn order_matters() {
        let d = digests(2);
        let swapped = vec![d[1].clone(), d[0].clone()];
        assert_ne!(compute_root(&d), compute_root(&swapped));
    }

    #[test]
    fn leaf_cannot_pose_as_node() {
        // A single leaf whose digest text is the concatenation of two child
        // hashes must not reproduce the two-leaf root.
        let d = digests(2);
        let forged = format!("{}{}", hash_leaf(&d[0]), hash_leaf(&d[1]));
        assert_ne!(compute_root(&[forged]), compute_root(&d));
    }

    #[test]
    fn tree_root_matches_compute_root() {
        for n in 1..=9 {
            let d = digests(n);
            assert_eq!(MerkleTree::build(&d).root(), compute_root(&d), "n = {n}");
        }
    }

    #[test]
    fn every_leaf_has_a_valid_proof() {
        for n in 1..=9 {
            let d = digests(n);
            let tree = MerkleTree::build(&d);
            let root = tree.root();
            for (i, digest) in d.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert!(verify_proof(&root, digest, &proof), "n = {n}, leaf {i}");
            }
            assert!(tree.proof(n).is_none());
        }
    }

    #[test]
    fn proof_rejects_wrong_digest_and_index() {
        let d = digests(5);
        let tree = MerkleTree::build(&d);
        let root = tree.root();
        let proof = tree.proof(1).unwrap();

        assert!(!verify_proof(&root, &d[2], &proof));

        let mut moved = proof.clone();
        moved.index = 0;
        assert!(!verify_proof(&root, &d[1], &moved));
    }

    proptest! {
        #[test]
        fn root_is_deterministic(n in 0usize..=64) {
            let d = digests(n);
            prop_assert_eq!(compute_root(&d), compute_root(&d));
        }

        /// Changing any single digest changes the root
        #[test]
        fn single_change_changes_root(
            n in 1usize..=64,
            pick in any::<usize>(),
            replacement in proptest::collection::vec(any::<u8>(), 1..=64),
        ) {
            let original = digests(n);
            let idx = pick % n;
            let mut changed = original.clone();
            changed[idx] = sha256_hex(&replacement);
            prop_assume!(changed[idx] != original[idx]);

            prop_assert_ne!(compute_root(&original), compute_root(&changed));
        }

        #[test]
        fn swapping_distinct_digests_changes_root(
            n in 2usize..=64,
            a in any::<usize>(),
            b in any::<usize>(),
        ) {
            let original = digests(n);
            let (i, j) = (a % n, b % n);
            prop_assume!(i != j);
            let mut swapped = original.clone();
            swapped.swap(i, j);

            prop_assert_ne!(compute_root(&original), compute_root(&swapped));
        }

        #[test]
        fn appending_changes_root(n in 1usize..=64) {
            let d = digests(n + 1);
            prop_assert_ne!(compute_root(&d[..n]), compute_root(&d));
        }
    }
}
