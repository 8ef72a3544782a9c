//! Storage proof construction (spec §4.1 "Storage proof construction"):
//! a Merkle proof for a consensus-chosen segment within its sector,
//! extended with the cached proof across all sector roots.

use host_common::crypto::Hash;

use crate::config::SECTOR_SIZE;
use crate::error::HostError;
use crate::merkle::{self, MerkleProof};

pub struct StorageProof {
    pub segment_index: u64,
    pub leaf: Hash,
    pub proof: MerkleProof,
}

/// `segment_index` is global across the whole contract (sector index
/// implied by dividing by segments-per-sector); `sector_bytes` must be
/// the contents of the sector containing it.
pub fn build_storage_proof(
    sector_roots: &[Hash],
    segment_index: u64,
    sector_bytes: &[u8],
    segment_size: u64,
) -> Result<StorageProof, HostError> {
    let segments_per_sector = SECTOR_SIZE / segment_size;
    let sector_index = (segment_index / segments_per_sector) as usize;
    let local_index = (segment_index % segments_per_sector) as usize;
    if sector_index >= sector_roots.len() {
        return Err(HostError::InvalidPrecondition(format!(
            "segment index {segment_index} implies sector {sector_index}, but obligation only has {} sectors",
            sector_roots.len()
        )));
    }

    let leaves = merkle::segment_leaves(sector_bytes, segment_size as usize);
    if local_index >= leaves.len() {
        return Err(HostError::InvalidPrecondition(format!(
            "local segment index {local_index} out of range for a sector with {} segments",
            leaves.len()
        )));
    }

    // The segment-within-sector proof joins directly onto the
    // sector-root-level proof: each sector root already represents the
    // root of exactly this segment tree, so no leaf-height adjustment
    // is needed beyond straight concatenation.
    let mut proof = merkle::proof(&leaves, local_index);
    proof.extend(merkle::proof(sector_roots, sector_index));

    Ok(StorageProof {
        segment_index,
        leaf: leaves[local_index],
        proof,
    })
}

pub fn verify_storage_proof(expected_contract_root: Hash, proof: &StorageProof) -> bool {
    merkle::verify(proof.leaf, &proof.proof, expected_contract_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_verifies_against_contract_root() {
        let segment_size = 64u64;
        let sector_a = vec![1u8; SECTOR_SIZE as usize];
        let sector_b = vec![2u8; SECTOR_SIZE as usize];
        let root_a = merkle::root(&merkle::segment_leaves(&sector_a, segment_size as usize));
        let root_b = merkle::root(&merkle::segment_leaves(&sector_b, segment_size as usize));
        let sector_roots = vec![root_a, root_b];
        let contract_root = merkle::root(&sector_roots);

        let segments_per_sector = SECTOR_SIZE / segment_size;
        let global_index = segments_per_sector + 3; // third segment of the second sector

        let sp = build_storage_proof(&sector_roots, global_index, &sector_b, segment_size).unwrap();
        assert!(verify_storage_proof(contract_root, &sp));
    }

    #[test]
    fn out_of_range_sector_is_rejected() {
        let sector_roots = vec![Hash::zero()];
        let err = build_storage_proof(&sector_roots, SECTOR_SIZE / 64 + 1, &[0u8; 64], 64);
        assert!(err.is_err());
    }
}
