//! Action-item scheduler (spec §4.1 "Action-item scheduler"): a
//! bucket-per-height index of obligation ids. On each consensus
//! advancement, every item at or below the new height is drained and
//! handed to a worker.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use host_common::crypto::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    CheckOriginConfirmed,
    SubmitRevision,
    SubmitStorageProof,
}

#[derive(Debug, Clone, Copy)]
pub struct ActionItem {
    pub height: u64,
    pub obligation_id: Hash,
    pub kind: ActionKind,
}

#[derive(Default)]
pub struct ActionItemScheduler {
    buckets: Mutex<BTreeMap<u64, Vec<(Hash, ActionKind)>>>,
}

impl ActionItemScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, height: u64, obligation_id: Hash, kind: ActionKind) {
        self.buckets
            .lock()
            .expect("scheduler mutex poisoned")
            .entry(height)
            .or_default()
            .push((obligation_id, kind));
    }

    /// Drain and return every item scheduled at or below `height`, in
    /// ascending height order.
    pub fn drain_up_to(&self, height: u64) -> Vec<ActionItem> {
        let mut buckets = self.buckets.lock().expect("scheduler mutex poisoned");
        let keep = buckets.split_off(&(height + 1));
        let due = std::mem::replace(&mut *buckets, keep);
        due.into_iter()
            .flat_map(|(h, items)| items.into_iter().map(move |(id, kind)| ActionItem { height: h, obligation_id: id, kind }))
            .collect()
    }

    /// Remove every pending item for `obligation_id` (used when an
    /// obligation resolves and its remaining action items become
    /// meaningless).
    pub fn cancel(&self, obligation_id: &Hash) {
        let mut buckets = self.buckets.lock().expect("scheduler mutex poisoned");
        for items in buckets.values_mut() {
            items.retain(|(id, _)| id != obligation_id);
        }
        buckets.retain(|_, items| !items.is_empty());
    }

    pub fn pending_obligation_ids(&self) -> HashSet<Hash> {
        self.buckets
            .lock()
            .expect("scheduler mutex poisoned")
            .values()
            .flatten()
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_up_to_returns_items_in_height_order() {
        let scheduler = ActionItemScheduler::new();
        let id = Hash::new([1; 32]);
        scheduler.schedule(10, id, ActionKind::SubmitRevision);
        scheduler.schedule(5, id, ActionKind::CheckOriginConfirmed);
        scheduler.schedule(20, id, ActionKind::SubmitStorageProof);

        let due = scheduler.drain_up_to(10);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].height, 5);
        assert_eq!(due[1].height, 10);

        let remaining = scheduler.drain_up_to(100);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].height, 20);
    }

    #[test]
    fn cancel_removes_all_items_for_id() {
        let scheduler = ActionItemScheduler::new();
        let id = Hash::new([2; 32]);
        scheduler.schedule(10, id, ActionKind::SubmitRevision);
        scheduler.schedule(20, id, ActionKind::SubmitStorageProof);
        scheduler.cancel(&id);
        assert!(scheduler.drain_up_to(100).is_empty());
    }
}
