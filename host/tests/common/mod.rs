//! Shared harness for the host-core integration tests: a `Host` wired
//! up against in-memory fakes for every external collaborator, plus a
//! couple of keypair helpers.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use host_common::crypto::{Hash, SigningKeyPair};
use storage_host::collaborators::{Consensus, SectorStorage, TransactionPool, TransactionSet, Wallet};
use storage_host::config::HostConfig;
use storage_host::error::HostError;
use storage_host::Host;

pub struct FakePool {
    pub origin_present: StdMutex<bool>,
    pub reject_origin: StdMutex<bool>,
}

impl Default for FakePool {
    fn default() -> Self {
        Self {
            origin_present: StdMutex::new(false),
            reject_origin: StdMutex::new(false),
        }
    }
}

#[async_trait]
impl TransactionPool for FakePool {
    async fn accept(&self, _txn_set: &TransactionSet) -> Result<bool, HostError> {
        Ok(true)
    }
    async fn contains_origin(&self, _id: &Hash) -> Result<bool, HostError> {
        if *self.reject_origin.lock().unwrap() {
            return Err(HostError::External(storage_host::error::ExternalError::ConsensusConflict(
                "double spend".into(),
            )));
        }
        Ok(*self.origin_present.lock().unwrap())
    }
    async fn fee_recommendation(&self) -> Result<u128, HostError> {
        Ok(0)
    }
}

pub struct FakeConsensus {
    pub height: StdMutex<u64>,
    pub synced: StdMutex<bool>,
}

impl Default for FakeConsensus {
    fn default() -> Self {
        Self {
            height: StdMutex::new(0),
            synced: StdMutex::new(true),
        }
    }
}

#[async_trait]
impl Consensus for FakeConsensus {
    async fn height(&self) -> u64 {
        *self.height.lock().unwrap()
    }
    async fn synced(&self) -> bool {
        *self.synced.lock().unwrap()
    }
    async fn storage_proof_segment_index(&self, _id: &Hash, _window_start: u64, _n: u64) -> Result<u64, HostError> {
        Ok(0)
    }
}

pub struct FakeWallet;

#[async_trait]
impl Wallet for FakeWallet {
    async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>, HostError> {
        Ok(unsigned.to_vec())
    }
}

#[derive(Default)]
pub struct FakeSectors(StdMutex<std::collections::HashMap<Hash, Vec<u8>>>);

#[async_trait]
impl SectorStorage for FakeSectors {
    async fn read_sector(&self, root: &Hash) -> Result<Vec<u8>, HostError> {
        self.0
            .lock()
            .unwrap()
            .get(root)
            .cloned()
            .ok_or_else(|| HostError::Program(storage_host::error::ProgramError::SectorNotFound(root.to_hex())))
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

#[allow(dead_code)]
pub struct TestHost {
    pub host: Arc<Host>,
    pub pool: Arc<FakePool>,
    pub consensus: Arc<FakeConsensus>,
    pub sectors: Arc<FakeSectors>,
    pub dir: tempfile::TempDir,
}

#[allow(dead_code)]
pub fn open_host(config: HostConfig) -> TestHost {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::default());
    let consensus = Arc::new(FakeConsensus::default());
    let sectors = Arc::new(FakeSectors::default());
    let host = Host::open(
        dir.path(),
        config,
        0,
        pool.clone(),
        consensus.clone(),
        Arc::new(FakeWallet),
        sectors.clone(),
    )
    .unwrap();
    TestHost {
        host,
        pool,
        consensus,
        sectors,
        dir,
    }
}

#[allow(dead_code)]
pub fn keypair() -> SigningKeyPair {
    SigningKeyPair::generate(&mut rand::rngs::OsRng)
}
