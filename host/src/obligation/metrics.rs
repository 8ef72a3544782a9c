//! Host-wide financial metrics (spec §4.1, §9 "Global mutable state").
//! A single value-typed aggregate updated under the obligation
//! manager's write lock and recomputed from scratch by a pure function
//! over the KV store during stale pruning (spec §4.1 "Stale pruning").

use std::sync::Mutex;

use metrics::gauge;
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::obligation::kv::ObligationKv;
use crate::obligation::types::{MoneyBuckets, ObligationStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub unresolved: MoneyBuckets,
    pub rejected: MoneyBuckets,
    pub succeeded: MoneyBuckets,
    pub failed: MoneyBuckets,
}

fn bucket_for_mut(metrics: &mut FinancialMetrics, status: ObligationStatus) -> &mut MoneyBuckets {
    match status {
        ObligationStatus::Unresolved => &mut metrics.unresolved,
        ObligationStatus::Rejected => &mut metrics.rejected,
        ObligationStatus::Succeeded => &mut metrics.succeeded,
        ObligationStatus::Failed => &mut metrics.failed,
    }
}

fn add(a: &mut MoneyBuckets, b: &MoneyBuckets) {
    a.contract_cost += b.contract_cost;
    a.locked_collateral += b.locked_collateral;
    a.potential_account_funding += b.potential_account_funding;
    a.potential_download_revenue += b.potential_download_revenue;
    a.potential_storage_revenue += b.potential_storage_revenue;
    a.potential_upload_revenue += b.potential_upload_revenue;
    a.risked_collateral += b.risked_collateral;
    a.transaction_fees_added += b.transaction_fees_added;
}

fn sub(a: &mut MoneyBuckets, b: &MoneyBuckets) {
    a.contract_cost = a.contract_cost.saturating_sub(b.contract_cost);
    a.locked_collateral = a.locked_collateral.saturating_sub(b.locked_collateral);
    a.potential_account_funding = a.potential_account_funding.saturating_sub(b.potential_account_funding);
    a.potential_download_revenue = a.potential_download_revenue.saturating_sub(b.potential_download_revenue);
    a.potential_storage_revenue = a.potential_storage_revenue.saturating_sub(b.potential_storage_revenue);
    a.potential_upload_revenue = a.potential_upload_revenue.saturating_sub(b.potential_upload_revenue);
    a.risked_collateral = a.risked_collateral.saturating_sub(b.risked_collateral);
    a.transaction_fees_added = a.transaction_fees_added.saturating_sub(b.transaction_fees_added);
}

pub struct MetricsTable {
    inner: Mutex<FinancialMetrics>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self { inner: Mutex::new(FinancialMetrics::default()) }
    }

    pub fn snapshot(&self) -> FinancialMetrics {
        *self.inner.lock().expect("metrics mutex poisoned")
    }

    pub fn on_add(&self, status: ObligationStatus, money: &MoneyBuckets) {
        let mut m = self.inner.lock().expect("metrics mutex poisoned");
        add(bucket_for_mut(&mut m, status), money);
        self.publish(&m);
    }

    pub fn on_remove(&self, status: ObligationStatus, money: &MoneyBuckets) {
        let mut m = self.inner.lock().expect("metrics mutex poisoned");
        sub(bucket_for_mut(&mut m, status), money);
        self.publish(&m);
    }

    /// Replace the old record's contribution with the new one's,
    /// atomically (spec §4.1 "Modify obligation": "subtracting the old
    /// record's buckets and adding the new record's buckets").
    pub fn on_replace(&self, old_status: ObligationStatus, old_money: &MoneyBuckets, new_status: ObligationStatus, new_money: &MoneyBuckets) {
        let mut m = self.inner.lock().expect("metrics mutex poisoned");
        sub(bucket_for_mut(&mut m, old_status), old_money);
        add(bucket_for_mut(&mut m, new_status), new_money);
        self.publish(&m);
    }

    fn publish(&self, m: &FinancialMetrics) {
        gauge!("host_locked_storage_collateral").set(m.unresolved.locked_collateral as f64);
        gauge!("host_risked_collateral").set(m.unresolved.risked_collateral as f64);
    }

    /// Recompute the whole aggregate from scratch by iterating the KV
    /// store (spec §4.1 "Stale pruning"). Also exposed standalone as an
    /// operator diagnostic, not just from the sweep.
    pub fn recompute_from_scratch(&self, kv: &ObligationKv) -> Result<FinancialMetrics, HostError> {
        let mut fresh = FinancialMetrics::default();
        for so in kv.iter_all()? {
            add(bucket_for_mut(&mut fresh, so.status), &so.money);
        }
        let mut m = self.inner.lock().expect("metrics mutex poisoned");
        *m = fresh;
        self.publish(&m);
        Ok(*m)
    }
}

impl Default for MetricsTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(n: u128) -> MoneyBuckets {
        MoneyBuckets { contract_cost: n, locked_collateral: n, ..Default::default() }
    }

    #[test]
    fn add_then_remove_is_a_no_op() {
        let table = MetricsTable::new();
        table.on_add(ObligationStatus::Unresolved, &money(10));
        table.on_remove(ObligationStatus::Unresolved, &money(10));
        assert_eq!(table.snapshot(), FinancialMetrics::default());
    }

    #[test]
    fn replace_moves_between_status_buckets() {
        let table = MetricsTable::new();
        table.on_add(ObligationStatus::Unresolved, &money(10));
        table.on_replace(ObligationStatus::Unresolved, &money(10), ObligationStatus::Succeeded, &money(10));
        let snap = table.snapshot();
        assert_eq!(snap.unresolved, MoneyBuckets::default());
        assert_eq!(snap.succeeded, money(10));
    }
}
