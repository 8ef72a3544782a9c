//! Storage Obligation Manager: add/modify/renew obligations, process
//! due action items against consensus and the transaction pool, and
//! sweep stale records.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::time::sleep;

use host_common::crypto::Hash;

use crate::alerter::{Alerter, Severity};
use crate::collaborators::{Consensus, SectorStorage, TransactionPool, TransactionSet, Wallet};
use crate::config::HostConfig;
use crate::error::{ExternalError, HostError, ProgramError};
use crate::obligation::kv::ObligationKv;
use crate::obligation::lock_table::ObligationLockTable;
use crate::obligation::metrics::MetricsTable;
use crate::obligation::scheduler::{ActionItemScheduler, ActionKind};
use crate::obligation::types::{MoneyBuckets, ObligationStatus, StorageObligation};

pub struct StorageObligationManager {
    kv: ObligationKv,
    locks: ObligationLockTable,
    metrics: MetricsTable,
    scheduler: ActionItemScheduler,
    alerter: Arc<Alerter>,
    config: HostConfig,
    pool: Arc<dyn TransactionPool>,
    consensus: Arc<dyn Consensus>,
    wallet: Arc<dyn Wallet>,
    sectors: Arc<dyn SectorStorage>,
}

impl StorageObligationManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: ObligationKv,
        alerter: Arc<Alerter>,
        config: HostConfig,
        pool: Arc<dyn TransactionPool>,
        consensus: Arc<dyn Consensus>,
        wallet: Arc<dyn Wallet>,
        sectors: Arc<dyn SectorStorage>,
    ) -> Self {
        Self {
            kv,
            locks: ObligationLockTable::new(),
            metrics: MetricsTable::new(),
            scheduler: ActionItemScheduler::new(),
            alerter,
            config,
            pool,
            consensus,
            wallet,
            sectors,
        }
    }

    pub fn metrics_snapshot(&self) -> crate::obligation::metrics::FinancialMetrics {
        self.metrics.snapshot()
    }

    pub fn get(&self, id: &Hash) -> Result<Option<StorageObligation>, HostError> {
        self.kv.get(id)
    }

    /// Insert a brand new obligation negotiated at `origin_txn_set`'s
    /// height and schedule its origin-confirmation, revision-submission,
    /// and storage-proof action items. Later retries of each are
    /// produced by the action-item worker rescheduling itself, not by
    /// scheduling more than one item per kind up front.
    pub async fn add_obligation(
        &self,
        mut obligation: StorageObligation,
        origin_txn_set: TransactionSet,
    ) -> Result<(), HostError> {
        let guard = self.locks.lock(obligation.id).await;
        if self.kv.get(&obligation.id)?.is_some() {
            return Err(HostError::InvalidPrecondition(format!(
                "obligation {} already exists",
                obligation.id
            )));
        }
        if obligation.negotiation_height + self.config.revision_submission_buffer >= obligation.expiration {
            return Err(HostError::InvalidPrecondition(format!(
                "obligation {} negotiation height {} leaves no room for the revision submission buffer before expiration {}",
                obligation.id, obligation.negotiation_height, obligation.expiration
            )));
        }
        if obligation.expiration + self.config.resubmission_timeout >= obligation.proof_deadline {
            return Err(HostError::InvalidPrecondition(format!(
                "obligation {} expiration {} leaves no room for the resubmission timeout before proof deadline {}",
                obligation.id, obligation.expiration, obligation.proof_deadline
            )));
        }

        self.pool
            .accept(&origin_txn_set)
            .await
            .map_err(|e| HostError::External(ExternalError::TransactionPoolRejected(e.to_string())))?;

        obligation.origin_txn_set = origin_txn_set;
        self.kv.put(&obligation)?;
        self.metrics.on_add(obligation.status, &obligation.money);
        self.scheduler.schedule(
            obligation.negotiation_height + self.config.resubmission_timeout,
            obligation.id,
            ActionKind::CheckOriginConfirmed,
        );
        self.scheduler.schedule(
            obligation.expiration.saturating_sub(self.config.revision_submission_buffer),
            obligation.id,
            ActionKind::SubmitRevision,
        );
        self.scheduler.schedule(
            obligation.expiration + self.config.resubmission_timeout,
            obligation.id,
            ActionKind::SubmitStorageProof,
        );
        drop(guard);
        Ok(())
    }

    /// Replace an obligation's sector set / money buckets under a fresh
    /// unsigned revision (spec §4.1 "Modify obligation"). Each sector in
    /// `sectors_to_add` must be exactly `SECTOR_SIZE` bytes; sectors are
    /// added to the storage backend first, the new obligation record is
    /// then persisted, and only once that succeeds are the sectors in
    /// `sectors_to_remove` freed. If persistence fails after sectors were
    /// added, those additions are rolled back so the backend never holds
    /// sectors no obligation references.
    ///
    /// Large contracts (file size at or above `large_contract_size`) are
    /// throttled by a short artificial delay so a burst of modifications
    /// on one huge contract can't starve modifications of unrelated
    /// obligations; the delay happens after the per-obligation lock is
    /// released so it never serializes across different obligations.
    pub async fn modify_obligation(
        &self,
        id: Hash,
        new_sector_roots: Vec<Hash>,
        sectors_to_add: Vec<(Hash, Vec<u8>)>,
        sectors_to_remove: Vec<Hash>,
        new_money: MoneyBuckets,
        revision_txn_set: TransactionSet,
    ) -> Result<(), HostError> {
        for (root, data) in &sectors_to_add {
            if data.len() as u64 != crate::config::SECTOR_SIZE {
                return Err(HostError::Program(ProgramError::InvalidSectorSize {
                    expected: crate::config::SECTOR_SIZE,
                    got: data.len() as u64,
                }));
            }
            let _ = root;
        }

        let is_large = {
            let guard = self.locks.lock(id).await;
            let mut existing = self
                .kv
                .get(&id)?
                .ok_or_else(|| HostError::ObligationNotFound(id.to_string()))?;
            if existing.is_resolved() {
                return Err(HostError::InvalidPrecondition(format!(
                    "obligation {id} is already resolved"
                )));
            }

            self.pool
                .accept(&revision_txn_set)
                .await
                .map_err(|e| HostError::External(ExternalError::TransactionPoolRejected(e.to_string())))?;

            let mut added = Vec::with_capacity(sectors_to_add.len());
            for (root, data) in sectors_to_add {
                self.sectors.add_sector(root, data).await?;
                added.push(root);
            }

            let old_status = existing.status;
            let old_money = existing.money;
            let is_large = new_sector_roots.len() as u64 * crate::config::SECTOR_SIZE >= self.config.large_contract_size;

            existing.sector_roots = new_sector_roots;
            existing.money = new_money;
            existing.revision_txn_set = revision_txn_set;
            existing.revision_number += 1;
            existing.revision_confirmed = false;
            existing.revision_constructed = true;

            if let Err(e) = self.kv.put(&existing) {
                for root in &added {
                    if let Err(rollback_err) = self.sectors.remove_sector(root).await {
                        error!("failed to roll back added sector {root} after a failed obligation persist: {rollback_err}");
                    }
                }
                return Err(e);
            }
            self.metrics.on_replace(old_status, &old_money, existing.status, &existing.money);

            for root in &sectors_to_remove {
                if let Err(e) = self.sectors.remove_sector(root).await {
                    warn!("failed to remove freed sector {root} for obligation {id}: {e}");
                }
            }
            drop(guard);
            is_large
        };

        if is_large {
            sleep(Duration::from_millis(self.config.large_contract_delay_ms)).await;
        }
        Ok(())
    }

    /// Push an obligation's expiration and proof deadline out under a new
    /// revision, scheduling the revision-submission action item.
    pub async fn renew_obligation(
        &self,
        id: Hash,
        new_expiration: u64,
        new_proof_deadline: u64,
        revision_txn_set: TransactionSet,
    ) -> Result<(), HostError> {
        let guard = self.locks.lock(id).await;
        let mut existing = self
            .kv
            .get(&id)?
            .ok_or_else(|| HostError::ObligationNotFound(id.to_string()))?;
        if existing.is_resolved() {
            return Err(HostError::InvalidPrecondition(format!(
                "obligation {id} is already resolved"
            )));
        }

        self.pool
            .accept(&revision_txn_set)
            .await
            .map_err(|e| HostError::External(ExternalError::TransactionPoolRejected(e.to_string())))?;

        existing.expiration = new_expiration;
        existing.proof_deadline = new_proof_deadline;
        existing.revision_txn_set = revision_txn_set;
        existing.revision_number += 1;
        existing.revision_confirmed = false;
        existing.revision_constructed = true;
        self.kv.put(&existing)?;
        self.scheduler
            .schedule(existing.expiration.saturating_sub(self.config.revision_submission_buffer), id, ActionKind::SubmitRevision);
        drop(guard);
        Ok(())
    }

    /// Drain every action item due at or below `height` and process it.
    pub async fn process_action_items(&self, height: u64) {
        for item in self.scheduler.drain_up_to(height) {
            if let Err(e) = self.process_one(height, item.obligation_id, item.kind).await {
                warn!("action item for obligation {} failed: {e}", item.obligation_id);
            }
        }
    }

    async fn process_one(&self, height: u64, id: Hash, kind: ActionKind) -> Result<(), HostError> {
        let guard = self.locks.lock(id).await;
        let mut obligation = match self.kv.get(&id)? {
            Some(o) => o,
            None => return Ok(()),
        };
        if obligation.is_resolved() {
            return Ok(());
        }

        match kind {
            ActionKind::CheckOriginConfirmed => {
                if obligation.origin_confirmed {
                    return Ok(());
                }
                match self.pool.contains_origin(&id).await {
                    Ok(true) => {
                        // still pending in the pool; check again later.
                        self.scheduler.schedule(height + self.config.resubmission_timeout, id, ActionKind::CheckOriginConfirmed);
                    }
                    Ok(false) => {
                        match self.pool.accept(&obligation.origin_txn_set).await {
                            Ok(_) => {
                                self.scheduler.schedule(height + self.config.resubmission_timeout, id, ActionKind::CheckOriginConfirmed);
                            }
                            Err(e) => {
                                self.reject(&mut obligation, &e.to_string())?;
                            }
                        }
                    }
                    Err(HostError::External(ExternalError::ConsensusConflict(reason))) => {
                        self.reject(&mut obligation, &reason)?;
                    }
                    Err(e) => {
                        warn!("origin-confirmation check for {id} failed: {e}");
                        self.scheduler.schedule(height + self.config.resubmission_timeout, id, ActionKind::CheckOriginConfirmed);
                    }
                }
            }
            ActionKind::SubmitRevision => {
                if obligation.revision_confirmed || height > obligation.expiration {
                    if !obligation.revision_confirmed && height > obligation.expiration {
                        self.reject(&mut obligation, "revision not confirmed by contract expiration")?;
                    }
                    return Ok(());
                }
                let mut signed = obligation.revision_txn_set.clone();
                if let Some(last) = signed.last().cloned() {
                    let fee_rate = self.pool.fee_recommendation().await.unwrap_or(0);
                    if fee_rate > 0 {
                        let signed_with_fee = self.wallet.sign(&last).await?;
                        *signed.last_mut().unwrap() = signed_with_fee;
                    }
                }
                match self.pool.accept(&signed).await {
                    Ok(_) => {
                        self.scheduler.schedule(height + self.config.resubmission_timeout, id, ActionKind::SubmitRevision);
                    }
                    Err(_) => {
                        self.scheduler.schedule(height + self.config.resubmission_timeout, id, ActionKind::SubmitRevision);
                    }
                }
            }
            ActionKind::SubmitStorageProof => {
                if obligation.proof_confirmed {
                    return Ok(());
                }
                if obligation.sector_roots.is_empty() && height >= obligation.expiration {
                    self.resolve_as(&mut obligation, ObligationStatus::Succeeded, "empty contract completed at expiry")?;
                    return Ok(());
                }
                if height > obligation.proof_deadline {
                    self.resolve_as(&mut obligation, ObligationStatus::Failed, "storage proof deadline passed unconfirmed")?;
                    return Ok(());
                }
                if height > obligation.expiration + self.config.resubmission_timeout {
                    match self.build_and_submit_proof(&obligation).await {
                        Ok(()) => {
                            obligation.proof_confirmed = true;
                            self.resolve_as(&mut obligation, ObligationStatus::Succeeded, "storage proof confirmed")?;
                            return Ok(());
                        }
                        Err(e) => {
                            self.alerter.register(
                                "som",
                                format!("proof-submit-{id}"),
                                e.to_string(),
                                Severity::Warning,
                            );
                            self.scheduler.schedule(height + self.config.resubmission_timeout, id, ActionKind::SubmitStorageProof);
                        }
                    }
                } else {
                    self.scheduler.schedule(obligation.expiration + self.config.resubmission_timeout, id, ActionKind::SubmitStorageProof);
                }
            }
        }

        self.kv.put(&obligation)?;
        drop(guard);
        Ok(())
    }

    async fn build_and_submit_proof(&self, obligation: &StorageObligation) -> Result<(), HostError> {
        let window_start = obligation.expiration;
        let segment_index = self
            .consensus
            .storage_proof_segment_index(&obligation.id, window_start, obligation.sector_roots.len() as u64)
            .await?;

        let segments_per_sector = crate::config::SECTOR_SIZE / crate::config::SEGMENT_SIZE;
        let sector_index = (segment_index / segments_per_sector) as usize;
        let sector_root = *obligation.sector_roots.get(sector_index).ok_or_else(|| {
            HostError::InvalidPrecondition(format!(
                "segment index {segment_index} implies sector {sector_index}, but obligation only has {} sectors",
                obligation.sector_roots.len()
            ))
        })?;
        let sector_bytes = self.sectors.read_sector(&sector_root).await?;

        let proof = crate::obligation::proof::build_storage_proof(
            &obligation.sector_roots,
            segment_index,
            &sector_bytes,
            crate::config::SEGMENT_SIZE,
        )?;
        let mut writer = host_common::serializer::Writer::new();
        writer.write_u64(proof.segment_index);
        writer.write_hash(&proof.leaf);
        writer.write_u64(proof.proof.len() as u64);
        for step in &proof.proof {
            match step {
                crate::merkle::ProofStep::Left(h) => {
                    writer.write_bool(false);
                    writer.write_hash(h);
                }
                crate::merkle::ProofStep::Right(h) => {
                    writer.write_bool(true);
                    writer.write_hash(h);
                }
            }
        }
        let mut txn_set = obligation.revision_txn_set.clone();
        txn_set.push(writer.into_bytes());

        self.pool.accept(&txn_set).await?;
        Ok(())
    }

    fn reject(&self, obligation: &mut StorageObligation, reason: &str) -> Result<(), HostError> {
        self.resolve_as(obligation, ObligationStatus::Rejected, reason)
    }

    /// Move an obligation to a terminal status (Rejected/Succeeded/Failed),
    /// updating aggregate metrics and cancelling any pending action items.
    fn resolve_as(&self, obligation: &mut StorageObligation, status: ObligationStatus, reason: &str) -> Result<(), HostError> {
        let old_status = obligation.status;
        let old_money = obligation.money;
        obligation.resolve(status);
        self.metrics.on_replace(old_status, &old_money, obligation.status, &obligation.money);
        self.scheduler.cancel(&obligation.id);
        info!("obligation {} resolved as {status:?}: {reason}", obligation.id);
        self.kv.put(obligation)
    }

    /// Recompute financial metrics from scratch and drop any resolved
    /// obligation whose consensus-conflict grace period has fully
    /// elapsed, so the KV store doesn't grow unbounded with settled
    /// history.
    pub async fn prune_stale(&self, height: u64) -> Result<(), HostError> {
        for obligation in self.kv.iter_all()? {
            if obligation.is_resolved() && height > obligation.proof_deadline + self.config.respend_timeout {
                let guard = self.locks.lock(obligation.id).await;
                self.kv.remove(&obligation.id)?;
                self.scheduler.cancel(&obligation.id);
                drop(guard);
            }
        }
        match self.metrics.recompute_from_scratch(&self.kv) {
            Ok(_) => {}
            Err(e) => error!("failed to recompute financial metrics during stale pruning: {e}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;

    struct FakePool {
        origin_present: StdMutex<bool>,
    }

    #[async_trait]
    impl TransactionPool for FakePool {
        async fn accept(&self, _txn_set: &TransactionSet) -> Result<bool, HostError> {
            Ok(true)
        }
        async fn contains_origin(&self, _contract_id: &Hash) -> Result<bool, HostError> {
            Ok(*self.origin_present.lock().unwrap())
        }
        async fn fee_recommendation(&self) -> Result<u128, HostError> {
            Ok(0)
        }
    }

    struct FakeConsensus;

    #[async_trait]
    impl Consensus for FakeConsensus {
        async fn height(&self) -> u64 {
            0
        }
        async fn synced(&self) -> bool {
            true
        }
        async fn storage_proof_segment_index(&self, _id: &Hash, _window_start: u64, _n: u64) -> Result<u64, HostError> {
            Ok(0)
        }
    }

    struct FakeWallet;

    #[async_trait]
    impl Wallet for FakeWallet {
        async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>, HostError> {
            Ok(unsigned.to_vec())
        }
    }

    #[derive(Default)]
    struct FakeSectors(StdMutex<std::collections::HashMap<Hash, Vec<u8>>>);

    #[async_trait]
    impl SectorStorage for FakeSectors {
        async fn read_sector(&self, root: &Hash) -> Result<Vec<u8>, HostError> {
            self.0.lock().unwrap().get(root).cloned().ok_or_else(|| HostError::Program(ProgramError::SectorNotFound(root.to_hex())))
        }
        async fn add_sector(&self, root: Hash, data: Vec<u8>) -> Result<(), HostError> {
            self.0.lock().unwrap().insert(root, data);
            Ok(())
        }
        async fn remove_sector(&self, root: &Hash) -> Result<(), HostError> {
            self.0.lock().unwrap().remove(root);
            Ok(())
        }
        async fn has_sector(&self, root: &Hash) -> Result<bool, HostError> {
            Ok(self.0.lock().unwrap().contains_key(root))
        }
    }

    fn manager(dir: &tempfile::TempDir) -> StorageObligationManager {
        StorageObligationManager::new(
            ObligationKv::open(dir.path()).unwrap(),
            Arc::new(Alerter::new()),
            HostConfig::default(),
            Arc::new(FakePool { origin_present: StdMutex::new(false) }),
            Arc::new(FakeConsensus),
            Arc::new(FakeWallet),
            Arc::new(FakeSectors::default()),
        )
    }

    fn sample_obligation(id: Hash) -> StorageObligation {
        StorageObligation {
            id,
            sector_roots: vec![],
            money: MoneyBuckets { contract_cost: 10, ..Default::default() },
            origin_txn_set: vec![],
            revision_txn_set: vec![],
            negotiation_height: 0,
            expiration: 1000,
            proof_deadline: 2000,
            revision_number: 0,
            origin_confirmed: false,
            revision_confirmed: false,
            proof_confirmed: false,
            revision_constructed: false,
            status: ObligationStatus::Unresolved,
        }
    }

    #[tokio::test]
    async fn add_obligation_persists_and_updates_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let id = Hash::new([7; 32]);
        mgr.add_obligation(sample_obligation(id), vec![]).await.unwrap();
        assert!(mgr.get(&id).unwrap().is_some());
        assert_eq!(mgr.metrics_snapshot().unresolved.contract_cost, 10);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let id = Hash::new([8; 32]);
        mgr.add_obligation(sample_obligation(id), vec![]).await.unwrap();
        let err = mgr.add_obligation(sample_obligation(id), vec![]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn modify_obligation_updates_money_and_bumps_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let id = Hash::new([9; 32]);
        mgr.add_obligation(sample_obligation(id), vec![]).await.unwrap();

        let new_money = MoneyBuckets { contract_cost: 25, ..Default::default() };
        let sector_data = vec![9u8; crate::config::SECTOR_SIZE as usize];
        let sector_root = Hash::new([1; 32]);
        mgr.modify_obligation(id, vec![sector_root], vec![(sector_root, sector_data)], vec![], new_money, vec![])
            .await
            .unwrap();

        let updated = mgr.get(&id).unwrap().unwrap();
        assert_eq!(updated.revision_number, 1);
        assert_eq!(updated.money.contract_cost, 25);
        assert_eq!(mgr.metrics_snapshot().unresolved.contract_cost, 25);
        assert!(mgr.sectors.has_sector(&sector_root).await.unwrap());
    }

    #[tokio::test]
    async fn modify_obligation_rejects_wrong_sized_sector() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let id = Hash::new([11; 32]);
        mgr.add_obligation(sample_obligation(id), vec![]).await.unwrap();

        let bad_root = Hash::new([2; 32]);
        let err = mgr
            .modify_obligation(id, vec![bad_root], vec![(bad_root, vec![0u8; 16])], vec![], MoneyBuckets::default(), vec![])
            .await;
        assert!(matches!(err, Err(HostError::Program(ProgramError::InvalidSectorSize { .. }))));
        assert!(!mgr.sectors.has_sector(&bad_root).await.unwrap());
    }

    #[tokio::test]
    async fn process_action_items_rejects_on_consensus_conflict() {
        struct ConflictPool;
        #[async_trait]
        impl TransactionPool for ConflictPool {
            async fn accept(&self, _txn_set: &TransactionSet) -> Result<bool, HostError> {
                Ok(true)
            }
            async fn contains_origin(&self, _id: &Hash) -> Result<bool, HostError> {
                Err(HostError::External(ExternalError::ConsensusConflict("double spend".into())))
            }
            async fn fee_recommendation(&self) -> Result<u128, HostError> {
                Ok(0)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mgr = StorageObligationManager::new(
            ObligationKv::open(dir.path()).unwrap(),
            Arc::new(Alerter::new()),
            HostConfig::default(),
            Arc::new(ConflictPool),
            Arc::new(FakeConsensus),
            Arc::new(FakeWallet),
            Arc::new(FakeSectors::default()),
        );
        let id = Hash::new([3; 32]);
        mgr.add_obligation(sample_obligation(id), vec![]).await.unwrap();
        mgr.process_action_items(mgr.get(&id).unwrap().unwrap().negotiation_height + mgr.config.resubmission_timeout).await;

        let final_state = mgr.get(&id).unwrap().unwrap();
        assert_eq!(final_state.status, ObligationStatus::Rejected);
    }

    fn manager_with_config(dir: &tempfile::TempDir, config: HostConfig) -> StorageObligationManager {
        StorageObligationManager::new(
            ObligationKv::open(dir.path()).unwrap(),
            Arc::new(Alerter::new()),
            config,
            Arc::new(FakePool { origin_present: StdMutex::new(false) }),
            Arc::new(FakeConsensus),
            Arc::new(FakeWallet),
            Arc::new(FakeSectors::default()),
        )
    }

    #[tokio::test]
    async fn storage_proof_lifecycle_resolves_succeeded_after_submission() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig {
            revision_submission_buffer: 5,
            resubmission_timeout: 3,
            ..HostConfig::default()
        };
        let mgr = manager_with_config(&dir, config);

        let id = Hash::new([31; 32]);
        let h0 = 100;
        let mut so = sample_obligation(id);
        so.negotiation_height = h0;
        so.expiration = h0 + 20;
        so.proof_deadline = h0 + 40;
        mgr.add_obligation(so, vec![]).await.unwrap();

        let sector_root = Hash::new([32; 32]);
        let sector_data = vec![1u8; crate::config::SECTOR_SIZE as usize];
        mgr.modify_obligation(id, vec![sector_root], vec![(sector_root, sector_data)], vec![], MoneyBuckets::default(), vec![])
            .await
            .unwrap();

        // Mine past expiration + resubmission_timeout: the proof is built and submitted.
        mgr.process_action_items(h0 + 20 + 3 + 1).await;

        let after_submit = mgr.get(&id).unwrap().unwrap();
        assert_eq!(after_submit.status, ObligationStatus::Succeeded);
        assert!(after_submit.sector_roots.is_empty());

        // Still Succeeded once the deadline itself is reached.
        mgr.process_action_items(h0 + 40 + 1).await;
        let after_deadline = mgr.get(&id).unwrap().unwrap();
        assert_eq!(after_deadline.status, ObligationStatus::Succeeded);
    }

    #[tokio::test]
    async fn storage_proof_deadline_without_submission_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig {
            revision_submission_buffer: 5,
            resubmission_timeout: 3,
            ..HostConfig::default()
        };
        let mgr = manager_with_config(&dir, config);

        let id = Hash::new([33; 32]);
        let h0 = 100;
        let mut so = sample_obligation(id);
        so.negotiation_height = h0;
        so.sector_roots = vec![Hash::new([34; 32])];
        so.expiration = h0 + 20;
        so.proof_deadline = h0 + 40;
        mgr.add_obligation(so, vec![]).await.unwrap();

        // Jump straight past the deadline without ever processing the
        // submit-proof action item beforehand.
        mgr.process_action_items(h0 + 40 + 1).await;

        let final_state = mgr.get(&id).unwrap().unwrap();
        assert_eq!(final_state.status, ObligationStatus::Failed);
        assert!(final_state.sector_roots.is_empty());
    }

    #[tokio::test]
    async fn empty_contract_succeeds_at_expiry_without_a_proof() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig {
            revision_submission_buffer: 5,
            resubmission_timeout: 3,
            ..HostConfig::default()
        };
        let mgr = manager_with_config(&dir, config);

        let id = Hash::new([35; 32]);
        let h0 = 100;
        let mut so = sample_obligation(id);
        so.negotiation_height = h0;
        so.sector_roots.clear();
        so.expiration = h0 + 20;
        so.proof_deadline = h0 + 40;
        mgr.add_obligation(so, vec![]).await.unwrap();

        mgr.process_action_items(h0 + 20 + 3).await;

        let final_state = mgr.get(&id).unwrap().unwrap();
        assert_eq!(final_state.status, ObligationStatus::Succeeded);
    }

    #[tokio::test]
    async fn prune_stale_removes_old_resolved_obligations() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let id = Hash::new([5; 32]);
        let mut so = sample_obligation(id);
        so.status = ObligationStatus::Succeeded;
        so.sector_roots.clear();
        mgr.kv.put(&so).unwrap();

        mgr.prune_stale(so.proof_deadline + mgr.config.respend_timeout + 1).await.unwrap();
        assert!(mgr.get(&id).unwrap().is_none());
    }
}
