//! Interfaces to the external collaborators the host core does not own
//! itself: the transaction pool, consensus, wallet, and the sector
//! storage backend. The core only ever calls through these traits; it
//! never constructs a concrete RPC/consensus client itself.

use async_trait::async_trait;

use host_common::crypto::Hash;

use crate::error::HostError;

/// A signed transaction set ready for submission: the primary
/// transaction plus every parent it depends on, in dependency order.
pub type TransactionSet = Vec<Vec<u8>>;

#[async_trait]
pub trait TransactionPool: Send + Sync {
    /// Submit a transaction set. `Ok(true)` if accepted, `Ok(false)` if
    /// already present (idempotent resubmission), `Err` on rejection.
    async fn accept(&self, txn_set: &TransactionSet) -> Result<bool, HostError>;

    /// Whether the origin transaction of `contract_id` is currently
    /// present in the pool (used by stale-obligation pruning).
    async fn contains_origin(&self, contract_id: &Hash) -> Result<bool, HostError>;

    /// A fee-per-byte recommendation used to fund last-minute revision
    /// resubmissions.
    async fn fee_recommendation(&self) -> Result<u128, HostError>;
}

#[async_trait]
pub trait Consensus: Send + Sync {
    /// Current block height.
    async fn height(&self) -> u64;

    /// Whether the node considers itself synced to the chain tip.
    /// Withdrawals are disabled while this is `false`.
    async fn synced(&self) -> bool;

    /// The segment index consensus selected for a storage-proof window,
    /// given the contract id and the window's starting height.
    async fn storage_proof_segment_index(
        &self,
        contract_id: &Hash,
        window_start: u64,
        num_sectors: u64,
    ) -> Result<u64, HostError>;
}

#[async_trait]
pub trait Wallet: Send + Sync {
    /// Sign a revision or storage-proof transaction with the host's key,
    /// returning the signed bytes ready for the transaction pool.
    async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>, HostError>;
}

/// The host database / contract manager's sector I/O surface, assumed
/// to be provided by the surrounding host process.
#[async_trait]
pub trait SectorStorage: Send + Sync {
    async fn read_sector(&self, root: &Hash) -> Result<Vec<u8>, HostError>;
    async fn add_sector(&self, root: Hash, data: Vec<u8>) -> Result<(), HostError>;
    async fn remove_sector(&self, root: &Hash) -> Result<(), HostError>;
    async fn has_sector(&self, root: &Hash) -> Result<bool, HostError>;
}
