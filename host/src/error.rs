//! Error taxonomy for the host core, grouped by the kinds enumerated in
//! the core's error-handling design: authentication, resource exhaustion,
//! replay, corruption, external-system, and MDM program errors. Only
//! external-system errors trigger local recovery (action-item retries);
//! every other kind surfaces to the caller untouched.

use thiserror::Error;

use host_common::crypto::CryptoError;

/// Kind 1: bad signature, expired/future withdrawal, wrong public key.
/// Returned to the caller; never mutates state.
#[derive(Debug, Error, Clone)]
pub enum AuthError {
    #[error("withdrawal signature is invalid")]
    InvalidSignature,
    #[error("withdrawal has already expired at height {expiry} (current height {current})")]
    Expired { expiry: u64, current: u64 },
    #[error("withdrawal expiry {expiry} is too far in the future (current {current}, max {max})")]
    ExtremeFuture { expiry: u64, current: u64, max: u64 },
    #[error("withdrawals are disabled while consensus is not synced")]
    WithdrawalsInactive,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Kind 2: resource errors. `BalanceInsufficient` is transient (the
/// caller blocks on the parked-withdrawal heap); the other two fail
/// fast.
#[derive(Debug, Error, Clone)]
pub enum ResourceError {
    #[error("account balance insufficient: need {need}, have {have}")]
    BalanceInsufficient { need: u128, have: u128 },
    #[error("deposit of {amount} would exceed max ephemeral account balance {max} (current {current})")]
    BalanceMaxExceeded {
        amount: u128,
        current: u128,
        max: u128,
    },
    #[error("unsaved withdrawal risk would exceed max {max} (current {current}, requested {requested})")]
    MaxRiskReached {
        current: u128,
        requested: u128,
        max: u128,
    },
}

/// Kind 5: external-system errors. Transient pool/I-O errors are retried
/// via action items; consensus conflicts force the obligation to
/// `Rejected`.
#[derive(Debug, Error, Clone)]
pub enum ExternalError {
    #[error("transaction pool rejected the transaction set: {0}")]
    TransactionPoolRejected(String),
    #[error("consensus reported a conflict: {0}")]
    ConsensusConflict(String),
    #[error("disk I/O failure: {0}")]
    Io(String),
}

/// Kind 6: MDM program errors. Any instruction error aborts the whole
/// program; no partial sector/registry state is ever committed.
#[derive(Debug, Error, Clone)]
pub enum ProgramError {
    #[error("insufficient budget: needed {needed}, remaining {remaining}")]
    InsufficientBudget { needed: u128, remaining: u128 },
    #[error("insufficient collateral: needed {needed}, remaining {remaining}")]
    InsufficientCollateral { needed: u128, remaining: u128 },
    #[error("program data request out of bounds: offset {offset}, length {length}, declared {declared}")]
    OutOfBounds {
        offset: u64,
        length: u64,
        declared: u64,
    },
    #[error("program data reader failed: {0}")]
    DataStreamFailed(String),
    #[error("sector not found: {0}")]
    SectorNotFound(String),
    #[error("no sectors to drop: requested {requested}, have {have}")]
    DropExceedsSectors { requested: u64, have: u64 },
    #[error("revision new file size/root does not match the program's computed result")]
    RevisionMismatch,
    #[error("instruction requires a write-enabled program")]
    ReadOnlyViolation,
    #[error("program memory budget exceeded: needed {needed}, remaining {remaining}")]
    MemoryExceeded { needed: u64, remaining: u64 },
    #[error("appended sector must be exactly {expected} bytes, got {got}")]
    InvalidSectorSize { expected: u64, got: u64 },
    #[error("sector index {index} out of range (have {len})")]
    IndexOutOfRange { index: u64, len: u64 },
}

/// Top-level error returned from every host-core operation.
#[derive(Debug, Error, Clone)]
pub enum HostError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("fingerprint already spent")]
    Replay,
    #[error("obligation {0} is locked by another caller")]
    Locked(String),
    #[error("persisted record corrupted: {0}")]
    Corruption(String),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("entry revision {given} does not supersede existing revision {existing}")]
    LowerRevNum { given: u64, existing: u64 },
    #[error("entry revision {revision} conflicts with an existing entry at the same revision")]
    SameRevNum { revision: u64 },
    #[error("registry is full")]
    RegistryFull,
    #[error("obligation not found: {0}")]
    ObligationNotFound(String),
    #[error("invalid precondition: {0}")]
    InvalidPrecondition(String),
}
