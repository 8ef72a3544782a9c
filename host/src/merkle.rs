//! Binary Merkle tree helpers shared by the storage obligation manager
//! (contract-level root over sector roots) and the MDM (segment-level
//! proofs within a sector).
//!
//! Leaves are combined pairwise left-to-right; an odd trailing leaf is
//! carried up unchanged (no synthetic padding leaf), so adding a sector
//! only recomputes the path from the new leaf to the root and never
//! rehashes the whole tree.

use host_common::crypto::{hash_all, Hash};

/// One step of an inclusion proof: the sibling hash and which side it
/// sits on relative to the node being proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofStep {
    Left(Hash),
    Right(Hash),
}

pub type MerkleProof = Vec<ProofStep>;

/// Root of the tree over `leaves`. Empty input hashes to the zero hash
/// (an obligation with no sectors has no meaningful root; callers treat
/// the empty-sector case specially).
pub fn root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::zero();
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        level = combine_level(&level);
    }
    level[0]
}

fn combine_level(level: &[Hash]) -> Vec<Hash> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    let mut i = 0;
    while i + 1 < level.len() {
        next.push(hash_all(&[level[i].as_bytes(), level[i + 1].as_bytes()]));
        i += 2;
    }
    if i < level.len() {
        next.push(level[i]);
    }
    next
}

/// Inclusion proof for `leaves[index]`, ordered from the leaf's sibling
/// up to the child of the root.
pub fn proof(leaves: &[Hash], index: usize) -> MerkleProof {
    assert!(index < leaves.len(), "merkle proof index out of range");
    let mut steps = Vec::new();
    let mut level: Vec<Hash> = leaves.to_vec();
    let mut idx = index;
    while level.len() > 1 {
        if idx % 2 == 0 {
            if idx + 1 < level.len() {
                steps.push(ProofStep::Right(level[idx + 1]));
            }
        } else {
            steps.push(ProofStep::Left(level[idx - 1]));
        }
        level = combine_level(&level);
        idx /= 2;
    }
    steps
}

/// Recompute the root implied by `leaf` and `proof_steps`, used both by
/// tests and by the renter-facing verification path.
pub fn verify(leaf: Hash, proof_steps: &MerkleProof, expected_root: Hash) -> bool {
    let mut current = leaf;
    for step in proof_steps {
        current = match step {
            ProofStep::Left(sibling) => hash_all(&[sibling.as_bytes(), current.as_bytes()]),
            ProofStep::Right(sibling) => hash_all(&[current.as_bytes(), sibling.as_bytes()]),
        };
    }
    current == expected_root
}

/// Split raw sector bytes into `segment_size`-byte leaves, hashing each
/// one, for the segment-level proof inside a single sector. Leaf height
/// equals log2(sector_size / segment_size).
pub fn segment_leaves(sector_bytes: &[u8], segment_size: usize) -> Vec<Hash> {
    sector_bytes
        .chunks(segment_size)
        .map(host_common::crypto::hash)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(b: u8) -> Hash {
        Hash::new([b; 32])
    }

    #[test]
    fn single_leaf_root_is_the_leaf_itself() {
        assert_eq!(root(&[leaf(1)]), leaf(1));
    }

    #[test]
    fn proof_verifies_for_every_index() {
        let leaves: Vec<Hash> = (0..7u8).map(leaf).collect();
        let expected_root = root(&leaves);
        for i in 0..leaves.len() {
            let p = proof(&leaves, i);
            assert!(verify(leaves[i], &p, expected_root), "index {i} failed");
        }
    }

    #[test]
    fn odd_leaf_count_carries_trailing_leaf_up() {
        let leaves: Vec<Hash> = (0..5u8).map(leaf).collect();
        let expected_root = root(&leaves);
        let p = proof(&leaves, 4);
        assert!(verify(leaves[4], &p, expected_root));
    }

    #[test]
    fn empty_leaves_hash_to_zero() {
        assert_eq!(root(&[]), Hash::zero());
    }
}
