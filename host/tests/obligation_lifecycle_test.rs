//! End-to-end storage-obligation scenarios driven through `Host`.

mod common;

use host_common::crypto::Hash;
use storage_host::config::HostConfig;
use storage_host::obligation::{MoneyBuckets, ObligationStatus, StorageObligation};

fn sample(id: Hash, negotiation_height: u64, expiration: u64, proof_deadline: u64) -> StorageObligation {
    StorageObligation {
        id,
        sector_roots: vec![],
        money: MoneyBuckets {
            contract_cost: 10,
            ..Default::default()
        },
        origin_txn_set: vec![],
        revision_txn_set: vec![],
        negotiation_height,
        expiration,
        proof_deadline,
        revision_number: 0,
        origin_confirmed: false,
        revision_confirmed: false,
        proof_confirmed: false,
        revision_constructed: false,
        status: ObligationStatus::Unresolved,
    }
}

/// Spec scenario 5: add an obligation with a sector, mine past
/// `expiration + resubmission_timeout` so the host submits the storage
/// proof, then confirm it reads Succeeded with an empty sector list once
/// the proof deadline is reached.
#[tokio::test]
async fn storage_proof_lifecycle_through_host() {
    let t = common::open_host(HostConfig {
        revision_submission_buffer: 5,
        resubmission_timeout: 3,
        ..HostConfig::default()
    });

    let id = Hash::new([41; 32]);
    let h0 = 1_000;
    t.host
        .obligations
        .add_obligation(sample(id, h0, h0 + 20, h0 + 40), vec![])
        .await
        .unwrap();

    let sector_root = Hash::new([42; 32]);
    let sector_data = vec![7u8; storage_host::config::SECTOR_SIZE as usize];
    t.host
        .obligations
        .modify_obligation(id, vec![sector_root], vec![(sector_root, sector_data)], vec![], MoneyBuckets::default(), vec![])
        .await
        .unwrap();
    assert!(t.sectors.has_sector(&sector_root).await.unwrap());

    t.host.obligations.process_action_items(h0 + 20 + 3 + 1).await;

    t.host.obligations.process_action_items(h0 + 40 + 1).await;
    let final_state = t.host.obligations.get(&id).unwrap().unwrap();
    assert_eq!(final_state.status, ObligationStatus::Succeeded);
    assert!(final_state.sector_roots.is_empty());
}

/// Spec scenario 6: the pool refuses the origin transaction set, so the
/// obligation is never added and the financial metrics are untouched.
#[tokio::test]
async fn rejected_obligation_leaves_metrics_unchanged() {
    struct AlwaysRejectPool;
    #[async_trait::async_trait]
    impl storage_host::collaborators::TransactionPool for AlwaysRejectPool {
        async fn accept(&self, _txn_set: &storage_host::collaborators::TransactionSet) -> Result<bool, storage_host::HostError> {
            Err(storage_host::HostError::InvalidPrecondition("pool refused the origin transaction".into()))
        }
        async fn contains_origin(&self, _id: &Hash) -> Result<bool, storage_host::HostError> {
            Ok(false)
        }
        async fn fee_recommendation(&self) -> Result<u128, storage_host::HostError> {
            Ok(0)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let host = storage_host::Host::open(
        dir.path(),
        HostConfig::default(),
        0,
        std::sync::Arc::new(AlwaysRejectPool),
        std::sync::Arc::new(common::FakeConsensus::default()),
        std::sync::Arc::new(common::FakeWallet),
        std::sync::Arc::new(common::FakeSectors::default()),
    )
    .unwrap();

    let before = host.obligations.metrics_snapshot();
    let id = Hash::new([51; 32]);
    let err = host.obligations.add_obligation(sample(id, 0, 1000, 2000), vec![]).await;
    assert!(err.is_err());
    assert!(host.obligations.get(&id).unwrap().is_none());
    let after = host.obligations.metrics_snapshot();
    assert_eq!(before.unresolved.contract_cost, after.unresolved.contract_cost);
}
