//! The authoritative per-contract record (spec §3 "StorageObligation").

use serde::{Deserialize, Serialize};

use host_common::crypto::Hash;

use crate::collaborators::TransactionSet;
use crate::config::SECTOR_SIZE;
use crate::merkle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationStatus {
    Unresolved,
    Rejected,
    Succeeded,
    Failed,
}

/// The non-negative money buckets tracked per obligation (spec §3). All
/// amounts are in the smallest currency unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyBuckets {
    pub contract_cost: u128,
    pub locked_collateral: u128,
    pub potential_account_funding: u128,
    pub potential_download_revenue: u128,
    pub potential_storage_revenue: u128,
    pub potential_upload_revenue: u128,
    pub risked_collateral: u128,
    pub transaction_fees_added: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageObligation {
    pub id: Hash,
    pub sector_roots: Vec<Hash>,
    pub money: MoneyBuckets,

    pub origin_txn_set: TransactionSet,
    pub revision_txn_set: TransactionSet,

    pub negotiation_height: u64,
    /// Height at which the contract's storage window ends and the host
    /// must have the latest revision confirmed on chain.
    pub expiration: u64,
    /// Height by which the storage proof must be confirmed.
    pub proof_deadline: u64,
    pub revision_number: u64,

    pub origin_confirmed: bool,
    pub revision_confirmed: bool,
    pub proof_confirmed: bool,
    pub revision_constructed: bool,

    pub status: ObligationStatus,
}

impl StorageObligation {
    pub fn file_size(&self) -> u64 {
        self.sector_roots.len() as u64 * SECTOR_SIZE
    }

    pub fn merkle_root(&self) -> Hash {
        merkle::root(&self.sector_roots)
    }

    /// Invariant (spec §3): once `status != Unresolved`, `sector_roots`
    /// is cleared.
    pub fn resolve(&mut self, status: ObligationStatus) {
        self.status = status;
        if status != ObligationStatus::Unresolved {
            self.sector_roots.clear();
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status != ObligationStatus::Unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StorageObligation {
        StorageObligation {
            id: Hash::new([1; 32]),
            sector_roots: vec![Hash::new([2; 32])],
            money: MoneyBuckets::default(),
            origin_txn_set: vec![],
            revision_txn_set: vec![],
            negotiation_height: 0,
            expiration: 100,
            proof_deadline: 200,
            revision_number: 1,
            origin_confirmed: true,
            revision_confirmed: true,
            proof_confirmed: false,
            revision_constructed: false,
            status: ObligationStatus::Unresolved,
        }
    }

    #[test]
    fn file_size_matches_sector_count() {
        let so = sample();
        assert_eq!(so.file_size(), SECTOR_SIZE);
    }

    #[test]
    fn resolving_clears_sector_roots() {
        let mut so = sample();
        so.resolve(ObligationStatus::Succeeded);
        assert!(so.sector_roots.is_empty());
    }
}
