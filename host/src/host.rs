//! Top-level wiring: the storage host core owns one instance each of the
//! registry, ephemeral account manager, storage obligation manager, and
//! price table cache, plus the shared alerter, and drives their
//! background loops from a single process-wide stop signal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::accounts::EphemeralAccountManager;
use crate::alerter::Alerter;
use crate::collaborators::{Consensus, SectorStorage, TransactionPool, Wallet};
use crate::config::HostConfig;
use crate::error::{ExternalError, HostError};
use crate::obligation::kv::ObligationKv;
use crate::obligation::StorageObligationManager;
use crate::pricetable::PriceTableCache;
use crate::registry::Registry;

pub struct Host {
    pub config: Arc<HostConfig>,
    pub registry: Arc<Registry>,
    pub accounts: Arc<EphemeralAccountManager>,
    pub obligations: Arc<StorageObligationManager>,
    pub price_tables: Arc<PriceTableCache>,
    pub alerter: Arc<Alerter>,
    consensus: Arc<dyn Consensus>,
    stop: Arc<Notify>,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        data_dir: impl AsRef<Path>,
        config: HostConfig,
        current_height: u64,
        pool: Arc<dyn TransactionPool>,
        consensus: Arc<dyn Consensus>,
        wallet: Arc<dyn Wallet>,
        sectors: Arc<dyn SectorStorage>,
    ) -> Result<Arc<Self>, HostError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).map_err(|e| HostError::External(ExternalError::Io(e.to_string())))?;
        let config = Arc::new(config);
        let alerter = Arc::new(Alerter::new());

        let registry = Registry::open(data_dir.join("registry.dat"), config.registry_size)?;
        let accounts = EphemeralAccountManager::open(data_dir.join("accounts"), config.clone(), current_height)?;
        let obligation_kv = ObligationKv::open(data_dir.join("obligations"))?;
        let obligations = Arc::new(StorageObligationManager::new(
            obligation_kv,
            alerter.clone(),
            (*config).clone(),
            pool,
            consensus.clone(),
            wallet,
            sectors,
        ));
        let price_tables = Arc::new(PriceTableCache::new());

        Ok(Arc::new(Self {
            config,
            registry,
            accounts,
            obligations,
            price_tables,
            alerter,
            consensus,
            stop: Arc::new(Notify::new()),
        }))
    }

    /// Spawn every background loop the host core owns. Each task exits
    /// once `shutdown` is called; callers awaiting the returned handles
    /// get a clean join on shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let accounts = self.accounts.clone();
        let stop = self.stop.clone();
        handles.push(tokio::spawn(async move { accounts.persist_loop(stop).await }));

        let accounts = self.accounts.clone();
        let stop = self.stop.clone();
        handles.push(tokio::spawn(async move { accounts.fingerprint_persist_loop(stop).await }));

        let price_tables = self.price_tables.clone();
        let stop = self.stop.clone();
        handles.push(tokio::spawn(async move { price_tables.prune_loop(stop, Duration::from_secs(60)).await }));

        let this = self.clone();
        handles.push(tokio::spawn(async move { this.action_item_loop().await }));

        let this = self.clone();
        handles.push(tokio::spawn(async move { this.stale_sweep_loop().await }));

        handles
    }

    async fn action_item_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(10)) => {
                    let height = self.consensus.height().await;
                    self.obligations.process_action_items(height).await;
                    if let Err(e) = self.accounts.rotate_fingerprint_buckets(height) {
                        self.alerter.register("host", "fingerprint-rotate", e.to_string(), crate::alerter::Severity::Warning);
                    }
                }
                _ = self.stop.notified() => break,
            }
        }
    }

    async fn stale_sweep_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                    let height = self.consensus.height().await;
                    if let Err(e) = self.obligations.prune_stale(height).await {
                        self.alerter.register("host", "stale-sweep", e.to_string(), crate::alerter::Severity::Critical);
                    }
                    let expiry_ns = self.config.ephemeral_account_expiry_secs * 1_000_000_000;
                    if let Err(e) = self.accounts.prune_expired(host_common::time::now_ns(), expiry_ns) {
                        self.alerter.register("host", "account-sweep", e.to_string(), crate::alerter::Severity::Warning);
                    }
                }
                _ = self.stop.notified() => break,
            }
        }
    }

    pub fn shutdown(&self) {
        self.stop.notify_waiters();
    }
}
