//! Host configuration surface. Loaded from the host settings JSON at
//! startup (parsing CLI flags is the command dispatcher's job, out of
//! this core's scope); the core only owns the typed struct and its
//! defaults.

use serde::{Deserialize, Serialize};

/// 4 MiB, the fixed sector size the obligation manager and MDM agree on.
pub const SECTOR_SIZE: u64 = 4 * 1024 * 1024;

/// Registry entry size on disk.
pub const REGISTRY_ENTRY_SIZE: usize = 256;

/// Bytes of `data` a registry entry may carry (256 total minus the fixed
/// fields: 1 + 32 + 32 + 4 + 1 + revision(8) + signature(64) + type(1) = 143,
/// leaving 113 for data).
pub const REGISTRY_DATA_SIZE: usize = 113;

/// Accounts file record size.
pub const ACCOUNT_RECORD_SIZE: usize = 128;

/// Accounts file header size.
pub const ACCOUNTS_HEADER_SIZE: usize = 256;

/// Fingerprint entry size on disk.
pub const FINGERPRINT_SIZE: usize = 32;

/// Merkle segment size used for storage proof construction (one leaf of
/// the per-sector Merkle tree).
pub const SEGMENT_SIZE: u64 = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    // --- Ephemeral accounts ---
    /// Duration (seconds) of inactivity after which an account is pruned.
    pub ephemeral_account_expiry_secs: u64,
    /// Per-account balance cap, in the smallest currency unit.
    pub max_ephemeral_account_balance: u128,
    /// Ceiling on the sum of unsaved (not yet durably persisted) withdrawals.
    pub max_ephemeral_account_risk: u128,
    /// Number of blocks covered by one fingerprint bucket file.
    pub bucket_block_range: u64,

    // --- Collateral / contract timing ---
    pub max_collateral: u128,
    pub collateral_budget: u128,
    pub max_duration: u64,
    pub window_size: u64,

    // --- Pricing floor ---
    pub min_contract_price: u128,
    pub min_download_bandwidth_price: u128,
    pub min_storage_price: u128,
    pub min_upload_bandwidth_price: u128,

    // --- Registry ---
    pub registry_size: u64,

    // --- Obligation manager timing ---
    pub revision_submission_buffer: u64,
    pub resubmission_timeout: u64,
    pub respend_timeout: u64,

    // --- Large-contract throttling ---
    pub large_contract_size: u64,
    pub large_contract_delay_ms: u64,

    // --- Obligation lock table ---
    pub try_lock_default_timeout_ms: u64,

    // --- MDM ---
    /// Cap on the bytes an MDM program may materialize over its
    /// lifetime (tracked as `remaining_memory`). Distinct from the
    /// currency-denominated `memory_cost` charged against the budget.
    pub max_program_memory: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ephemeral_account_expiry_secs: 7 * 24 * 3600,
            max_ephemeral_account_balance: 1_000_000_000_000_000_000,
            max_ephemeral_account_risk: 100_000_000_000_000_000,
            bucket_block_range: 20,
            max_collateral: u128::MAX / 2,
            collateral_budget: u128::MAX / 2,
            max_duration: 144 * 30 * 6,
            window_size: 144,
            min_contract_price: 1,
            min_download_bandwidth_price: 1,
            min_storage_price: 1,
            min_upload_bandwidth_price: 1,
            registry_size: 1 << 16,
            revision_submission_buffer: 144,
            resubmission_timeout: 3,
            respend_timeout: 72,
            large_contract_size: 1 << 40,
            large_contract_delay_ms: 250,
            try_lock_default_timeout_ms: 5_000,
            max_program_memory: 32 * 1024 * 1024,
        }
    }
}
