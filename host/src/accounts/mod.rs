//! Ephemeral Account Manager: a bank of renter-owned micropayment
//! accounts with at-most-once withdrawal semantics, bounded unsaved
//! risk, and crash-safe fingerprint persistence.
//!
//! All account state is mutated under the manager's master mutex;
//! deposit/withdraw scheduling only holds per-account state (the
//! blocked-withdrawal heap) while a caller is suspended waiting on
//! funds or on risk backpressure.

pub mod file;
pub mod fingerprint;
pub mod message;
pub mod record;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use host_common::crypto::Hash;
use host_common::time::now_ns;
use log::{error, warn};
use metrics::gauge;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::accounts::file::AccountsFile;
use crate::accounts::fingerprint::FingerprintStore;
use crate::accounts::message::WithdrawalMessage;
use crate::accounts::record::AccountRecord;
use crate::config::HostConfig;
use crate::error::{AuthError, ExternalError, HostError, ResourceError};

/// One caller parked in an account's blocked-withdrawal heap, ordered by
/// `(priority, arrival_seq)` ascending.
struct Blocked {
    priority: u64,
    seq: u64,
    amount: u128,
    release: oneshot::Sender<()>,
}

impl PartialEq for Blocked {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Blocked {}
impl PartialOrd for Blocked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Blocked {
    /// Reversed so a `BinaryHeap` (max-heap) pops the smallest
    /// `(priority, seq)` first, i.e. earliest-priority-then-earliest-arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct AccountState {
    record: AccountRecord,
    index: u32,
    blocked: BinaryHeap<Blocked>,
}

struct PersistRequest {
    index: u32,
    record: AccountRecord,
    /// Amount to subtract from the manager's unsaved-risk counter once
    /// this record is durably on disk.
    risk_delta: u128,
}

pub struct EphemeralAccountManager {
    config: Arc<HostConfig>,
    accounts_file: Mutex<AccountsFile>,
    fingerprints: FingerprintStore,
    state: Mutex<HashMap<Hash, AccountState>>,
    free_indices: Mutex<Vec<u32>>,
    next_seq: AtomicU64,
    current_risk: Mutex<u128>,
    risk_notify: Notify,
    persist_tx: mpsc::UnboundedSender<PersistRequest>,
    persist_rx: Mutex<Option<mpsc::UnboundedReceiver<PersistRequest>>>,
}

impl EphemeralAccountManager {
    pub fn open(data_dir: impl AsRef<Path>, config: Arc<HostConfig>, current_height: u64) -> Result<Arc<Self>, HostError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        let mut accounts_file = AccountsFile::open(data_dir.join("accounts.dat"))?;
        let fingerprints = FingerprintStore::open(data_dir, current_height, config.bucket_block_range)?;

        let mut state = HashMap::new();
        let mut free_indices = Vec::new();
        let slot_count = accounts_file.slot_count()?;
        for index in 1..slot_count.max(1) {
            let record = match accounts_file.read_record(index) {
                Ok(r) => r,
                Err(e) => {
                    error!("accounts file: failed to read slot {index}: {e}");
                    continue;
                }
            };
            if record.is_free() {
                free_indices.push(index);
            } else {
                state.insert(
                    record.account_id,
                    AccountState {
                        record,
                        index,
                        blocked: BinaryHeap::new(),
                    },
                );
            }
        }
        gauge!("host_ephemeral_accounts_total").set(state.len() as f64);

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Arc::new(Self {
            config,
            accounts_file: Mutex::new(accounts_file),
            fingerprints,
            state: Mutex::new(state),
            free_indices: Mutex::new(free_indices),
            next_seq: AtomicU64::new(0),
            current_risk: Mutex::new(0),
            risk_notify: Notify::new(),
            persist_tx: tx,
            persist_rx: Mutex::new(Some(rx)),
        }))
    }

    pub fn current_risk(&self) -> u128 {
        *self.current_risk.lock().expect("risk mutex poisoned")
    }

    pub fn balance(&self, account_id: &Hash) -> u128 {
        self.state
            .lock()
            .expect("accounts mutex poisoned")
            .get(account_id)
            .map(|a| a.record.balance)
            .unwrap_or(0)
    }

    /// Index-recycling free-list allocation preferring recycled slots
    /// before extending the file.
    fn allocate_index(&self) -> Result<u32, HostError> {
        if let Some(index) = self.free_indices.lock().expect("free-list mutex poisoned").pop() {
            return Ok(index);
        }
        self.accounts_file.lock().expect("accounts file mutex poisoned").append_slot()
    }

    fn get_or_create<'a>(
        &self,
        state: &'a mut HashMap<Hash, AccountState>,
        account_id: Hash,
    ) -> Result<&'a mut AccountState, HostError> {
        if !state.contains_key(&account_id) {
            let index = self.allocate_index()?;
            state.insert(
                account_id,
                AccountState {
                    record: AccountRecord {
                        account_id,
                        balance: 0,
                        last_txn_time: now_ns(),
                    },
                    index,
                    blocked: BinaryHeap::new(),
                },
            );
            gauge!("host_ephemeral_accounts_total").set(state.len() as f64);
        }
        Ok(state.get_mut(&account_id).expect("just inserted"))
    }

    fn queue_persist(&self, index: u32, record: AccountRecord, risk_delta: u128) {
        if self
            .persist_tx
            .send(PersistRequest { index, record: record.clone(), risk_delta })
            .is_err()
        {
            error!("ephemeral account persist queue closed; persisting inline");
            if let Err(e) = self.accounts_file.lock().expect("accounts file mutex poisoned").write_record(index, &record) {
                error!("inline account persist failed: {e}");
            }
        }
    }

    /// Release any blocked withdrawals whose amount now fits the new
    /// balance, smallest `(priority, seq)` first. Only the balance is
    /// debited here; the woken `withdraw` call still runs the risk
    /// backpressure loop itself and is the sole place `current_risk` is
    /// credited, so a released withdrawal is not double-counted.
    fn release_blocked(&self, acct: &mut AccountState) {
        while let Some(top) = acct.blocked.peek() {
            if top.amount > acct.record.balance {
                break;
            }
            let top = acct.blocked.pop().expect("peeked");
            acct.record.balance -= top.amount;
            acct.record.last_txn_time = now_ns();
            let _ = top.release.send(());
        }
    }

    fn credit(&self, account_id: Hash, amount: u128, ignore_cap: bool) -> Result<(), HostError> {
        let mut state = self.state.lock().expect("accounts mutex poisoned");
        let acct = self.get_or_create(&mut state, account_id)?;
        let new_balance = acct
            .record
            .balance
            .checked_add(amount)
            .ok_or_else(|| HostError::Resource(ResourceError::BalanceMaxExceeded {
                amount,
                current: acct.record.balance,
                max: self.config.max_ephemeral_account_balance,
            }))?;
        if !ignore_cap && new_balance > self.config.max_ephemeral_account_balance {
            return Err(HostError::Resource(ResourceError::BalanceMaxExceeded {
                amount,
                current: acct.record.balance,
                max: self.config.max_ephemeral_account_balance,
            }));
        }
        acct.record.balance = new_balance;
        acct.record.last_txn_time = now_ns();
        self.release_blocked(acct);
        let (index, record) = (acct.index, acct.record.clone());
        drop(state);
        self.queue_persist(index, record, 0);
        Ok(())
    }

    /// Deposit, capped by `max_ephemeral_account_balance`. Persistence
    /// is queued asynchronously; the caller-provided `sync_signal`
    /// gates the function's return, not the disk write.
    pub async fn deposit(&self, account_id: Hash, amount: u128, sync_signal: oneshot::Receiver<()>) -> Result<(), HostError> {
        self.credit(account_id, amount, false)?;
        let _ = sync_signal.await;
        Ok(())
    }

    /// Like `deposit` but ignores the max-balance cap.
    pub fn refund(&self, account_id: Hash, amount: u128) -> Result<(), HostError> {
        self.credit(account_id, amount, true)
    }

    /// Verify, anti-replay check, and debit (possibly after blocking on
    /// insufficient balance and/or risk backpressure).
    pub async fn withdraw(
        &self,
        message: WithdrawalMessage,
        signature: host_common::crypto::Signature,
        priority: u64,
        current_height: u64,
        consensus_synced: bool,
    ) -> Result<(), HostError> {
        if !consensus_synced {
            return Err(HostError::Auth(AuthError::WithdrawalsInactive));
        }
        if message.expiry < current_height {
            return Err(HostError::Auth(AuthError::Expired {
                expiry: message.expiry,
                current: current_height,
            }));
        }
        let max_expiry = current_height + self.config.bucket_block_range;
        if message.expiry > max_expiry {
            return Err(HostError::Auth(AuthError::ExtremeFuture {
                expiry: message.expiry,
                current: current_height,
                max: max_expiry,
            }));
        }
        message
            .public_key
            .verify(&message.signed_bytes(), &signature)
            .map_err(|_| HostError::Auth(AuthError::InvalidSignature))?;

        let fp = fingerprint::derive(&message.signed_bytes(), message.expiry);
        if !self.fingerprints.check_and_insert(fp, message.expiry)? {
            return Err(HostError::Replay);
        }

        // Wait for sufficient balance, parking on the per-account heap
        // if needed. The fingerprint is already spent at this point, so
        // this withdrawal will eventually complete rather than being
        // silently dropped.
        let wait_for_funds = {
            let mut state = self.state.lock().expect("accounts mutex poisoned");
            let acct = self.get_or_create(&mut state, message.account_id)?;
            if acct.record.balance >= message.amount {
                acct.record.balance -= message.amount;
                acct.record.last_txn_time = now_ns();
                None
            } else {
                let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
                let (tx, rx) = oneshot::channel();
                acct.blocked.push(Blocked {
                    priority,
                    seq,
                    amount: message.amount,
                    release: tx,
                });
                Some(rx)
            }
        };
        if let Some(rx) = wait_for_funds {
            let _ = rx.await;
        }

        // Risk backpressure: block until enough prior withdrawals have
        // been durably persisted (spec §4.2, §5 "suspension points").
        loop {
            // Register interest before checking, not after: otherwise a
            // persist that completes between the check and the `.await`
            // below would notify nobody and this withdrawal would sleep
            // until the *next* persist.
            let notified = self.risk_notify.notified();
            let fits = {
                let mut risk = self.current_risk.lock().expect("risk mutex poisoned");
                if *risk + message.amount <= self.config.max_ephemeral_account_risk {
                    *risk += message.amount;
                    true
                } else {
                    false
                }
            };
            if fits {
                break;
            }
            notified.await;
        }

        let (index, record) = {
            let state = self.state.lock().expect("accounts mutex poisoned");
            let acct = state.get(&message.account_id).expect("account exists after withdraw");
            (acct.index, acct.record.clone())
        };
        self.queue_persist(index, record, message.amount);
        Ok(())
    }

    /// Prune accounts idle for `ephemeral_account_expiry_secs`, zeroing
    /// their slot and returning the index to the free list (spec §4.2
    /// "Index recycling"). Any remaining balance is forfeited and
    /// logged — the distilled spec is silent on whether pruning
    /// requires a zero balance; we chose literal compliance (abandoned
    /// accounts are swept regardless of balance) and log loudly so an
    /// operator notices (see DESIGN.md open question).
    pub fn prune_expired(&self, now: u64, expiry_ns: u64) -> Result<usize, HostError> {
        let mut state = self.state.lock().expect("accounts mutex poisoned");
        let mut to_remove = Vec::new();
        for (id, acct) in state.iter() {
            if acct.blocked.is_empty() && now.saturating_sub(acct.record.last_txn_time) > expiry_ns {
                to_remove.push(*id);
            }
        }
        let mut pruned = 0;
        for id in to_remove {
            let acct = state.remove(&id).expect("just found");
            if acct.record.balance > 0 {
                warn!("pruning ephemeral account {id} with non-zero balance {}", acct.record.balance);
            }
            self.accounts_file
                .lock()
                .expect("accounts file mutex poisoned")
                .write_record(acct.index, &AccountRecord::free())?;
            self.free_indices.lock().expect("free-list mutex poisoned").push(acct.index);
            pruned += 1;
        }
        gauge!("host_ephemeral_accounts_total").set(state.len() as f64);
        Ok(pruned)
    }

    pub fn rotate_fingerprint_buckets(&self, new_height: u64) -> Result<(), HostError> {
        self.fingerprints.rotate_if_needed(new_height)
    }

    /// Background persist loop: drains queued record writes, then
    /// releases the corresponding unsaved risk and wakes any withdrawal
    /// blocked on the risk ceiling (spec §4.2, §5 "Background persist
    /// loops").
    pub async fn persist_loop(&self, stop: Arc<Notify>) {
        let mut rx = match self.persist_rx.lock().expect("accounts mutex poisoned").take() {
            Some(rx) => rx,
            None => return,
        };
        loop {
            tokio::select! {
                item = rx.recv() => {
                    match item {
                        Some(req) => {
                            let write_result = self
                                .accounts_file
                                .lock()
                                .expect("accounts file mutex poisoned")
                                .write_record(req.index, &req.record);
                            if let Err(e) = write_result {
                                error!("ephemeral account persist failed for index {}: {e}", req.index);
                            }
                            if req.risk_delta > 0 {
                                let mut risk = self.current_risk.lock().expect("risk mutex poisoned");
                                *risk = risk.saturating_sub(req.risk_delta);
                                drop(risk);
                                self.risk_notify.notify_waiters();
                            }
                        }
                        None => break,
                    }
                }
                _ = stop.notified() => break,
            }
        }
    }

    /// Fingerprint bucket rotation loop, run alongside `persist_loop`
    /// (spec §4.2 "Fingerprint store" rotation on height crossing).
    pub async fn fingerprint_persist_loop(&self, stop: Arc<Notify>) {
        self.fingerprints.persist_loop(stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host_common::crypto::SigningKeyPair;
    use rand::rngs::OsRng;

    fn manager(dir: &Path) -> Arc<EphemeralAccountManager> {
        EphemeralAccountManager::open(dir, Arc::new(HostConfig::default()), 0).unwrap()
    }

    #[tokio::test]
    async fn deposit_then_withdraw() {
        let dir = tempfile::tempdir().unwrap();
        let eam = manager(dir.path());
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let account_id = message::account_id_for(&keypair.public_key());

        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();
        eam.deposit(account_id, 10, rx).await.unwrap();
        assert_eq!(eam.balance(&account_id), 10);

        let msg = WithdrawalMessage {
            account_id,
            public_key: keypair.public_key(),
            amount: 5,
            expiry: 10,
        };
        let sig = keypair.sign(&msg.signed_bytes());
        eam.withdraw(msg.clone(), sig, 0, 0, true).await.unwrap();
        assert_eq!(eam.balance(&account_id), 5);

        let sig2 = keypair.sign(&msg.signed_bytes());
        let err = eam.withdraw(msg, sig2, 0, 0, true).await;
        assert!(matches!(err, Err(HostError::Replay)));
    }

    #[tokio::test]
    async fn blocked_withdraw_released_by_deposit() {
        let dir = tempfile::tempdir().unwrap();
        let eam = manager(dir.path());
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let account_id = message::account_id_for(&keypair.public_key());

        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();
        eam.deposit(account_id, 5, rx).await.unwrap();

        let msg = WithdrawalMessage {
            account_id,
            public_key: keypair.public_key(),
            amount: 7,
            expiry: 10,
        };
        let sig = keypair.sign(&msg.signed_bytes());
        let eam2 = eam.clone();
        let handle = tokio::spawn(async move { eam2.withdraw(msg, sig, 0, 0, true).await });

        tokio::task::yield_now().await;
        assert_eq!(eam.balance(&account_id), 5);

        let (tx2, rx2) = oneshot::channel();
        tx2.send(()).unwrap();
        eam.deposit(account_id, 3, rx2).await.unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(eam.balance(&account_id), 1);
    }

    #[tokio::test]
    async fn withdraw_at_max_future_expiry_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let eam = manager(dir.path());
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let account_id = message::account_id_for(&keypair.public_key());
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();
        eam.deposit(account_id, 100, rx).await.unwrap();

        let range = eam.config.bucket_block_range;
        let ok_msg = WithdrawalMessage {
            account_id,
            public_key: keypair.public_key(),
            amount: 1,
            expiry: range,
        };
        let sig = keypair.sign(&ok_msg.signed_bytes());
        eam.withdraw(ok_msg, sig, 0, 0, true).await.unwrap();

        let too_far = WithdrawalMessage {
            account_id,
            public_key: keypair.public_key(),
            amount: 1,
            expiry: range + 1,
        };
        let sig2 = keypair.sign(&too_far.signed_bytes());
        let err = eam.withdraw(too_far, sig2, 0, 0, true).await;
        assert!(matches!(err, Err(HostError::Auth(AuthError::ExtremeFuture { .. }))));
    }

    #[tokio::test]
    async fn withdrawals_disabled_when_not_synced() {
        let dir = tempfile::tempdir().unwrap();
        let eam = manager(dir.path());
        let keypair = SigningKeyPair::generate(&mut OsRng);
        let account_id = message::account_id_for(&keypair.public_key());
        let msg = WithdrawalMessage {
            account_id,
            public_key: keypair.public_key(),
            amount: 1,
            expiry: 5,
        };
        let sig = keypair.sign(&msg.signed_bytes());
        let err = eam.withdraw(msg, sig, 0, 0, false).await;
        assert!(matches!(err, Err(HostError::Auth(AuthError::WithdrawalsInactive))));
    }

    #[test]
    fn deposit_capped_at_max_balance() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(HostConfig {
            max_ephemeral_account_balance: 10,
            ..HostConfig::default()
        });
        let eam = EphemeralAccountManager::open(dir.path(), config, 0).unwrap();
        let account_id = Hash::new([1; 32]);
        eam.credit(account_id, 10, false).unwrap();
        let err = eam.credit(account_id, 1, false);
        assert!(matches!(err, Err(HostError::Resource(ResourceError::BalanceMaxExceeded { .. }))));
        eam.refund(account_id, 1).unwrap();
        assert_eq!(eam.balance(&account_id), 11);
    }
}
