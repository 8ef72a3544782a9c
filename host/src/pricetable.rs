//! Price table cache. A renter fetches a price table, pays for it out of
//! band, then references it by id in every subsequent RPC/program within
//! its validity window. The cache and its background pruner are a
//! shared service sitting below the registry in dependency order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use host_common::crypto::Hash;
use serde::{Deserialize, Serialize};

/// Per-instruction costs charged by the MDM, drawn from the active price
/// table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstructionCost {
    pub execution_cost: u128,
    pub store_cost: u128,
    pub memory_cost: u128,
}

impl InstructionCost {
    pub const fn zero() -> Self {
        Self {
            execution_cost: 0,
            store_cost: 0,
            memory_cost: 0,
        }
    }

    pub fn total(&self) -> u128 {
        self.execution_cost
            .saturating_add(self.store_cost)
            .saturating_add(self.memory_cost)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTable {
    pub uid: Hash,
    pub validity_secs: u64,
    pub contract_price: u128,
    pub download_bandwidth_price: u128,
    pub upload_bandwidth_price: u128,
    pub storage_price: u128,
    pub collateral: u128,

    pub read_sector_cost: InstructionCost,
    pub append_sector_cost: InstructionCost,
    pub drop_sectors_cost: InstructionCost,
    pub has_sector_cost: InstructionCost,
    pub read_registry_cost: InstructionCost,
    pub update_registry_cost: InstructionCost,
    pub revision_metadata_cost: InstructionCost,
    pub swap_sector_cost: InstructionCost,

    /// Per-byte surcharge applied to `ReadSector`/`AppendSector` on top of
    /// their fixed instruction cost.
    pub read_byte_cost: u128,
    pub write_byte_cost: u128,
}

impl PriceTable {
    pub fn respects_floor(&self, cfg: &crate::config::HostConfig) -> bool {
        self.contract_price >= cfg.min_contract_price
            && self.download_bandwidth_price >= cfg.min_download_bandwidth_price
            && self.upload_bandwidth_price >= cfg.min_upload_bandwidth_price
            && self.storage_price >= cfg.min_storage_price
    }
}

struct CacheEntry {
    table: PriceTable,
    expires_at: Instant,
}

/// Cache of price tables a renter has paid for, keyed by their uid.
/// Entries are dropped once their validity window elapses; a background
/// loop periodically sweeps expired entries (see [`PriceTableCache::prune_loop`]).
#[derive(Default)]
pub struct PriceTableCache {
    entries: DashMap<Hash, CacheEntry>,
}

impl PriceTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: PriceTable) {
        let expires_at = Instant::now() + Duration::from_secs(table.validity_secs);
        self.entries.insert(table.uid, CacheEntry { table, expires_at });
    }

    /// Returns the table if present and not expired.
    pub fn get(&self, uid: &Hash) -> Option<PriceTable> {
        let entry = self.entries.get(uid)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.table.clone())
    }

    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Long-lived background task: periodically prunes expired entries
    /// until `stop` fires. Mirrors the fingerprint persister/action-item
    /// processor background-task shape used elsewhere in the core.
    pub async fn prune_loop(self: Arc<Self>, stop: Arc<tokio::sync::Notify>, interval: Duration) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.prune_expired();
                }
                _ = stop.notified() => {
                    break;
                }
            }
        }
    }
}
