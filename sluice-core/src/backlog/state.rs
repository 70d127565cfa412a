use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::worker::WorkerId;
use crate::item::{BacklogItem, ReceptionOrder};

/// Result of one snapshot reconciliation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    /// New items added to `pending`.
    pub admitted: usize,
    /// New items left out because `pending` reached its capacity.
    pub deferred: usize,
    /// Pending items dropped because they vanished from the snapshot.
    pub vanished_pending: usize,
    /// Completed items forgotten because they vanished from the snapshot.
    pub vanished_done: usize,
    /// Size of `pending` after reconciliation.
    pub pending: usize,
}

/// Point-in-time sizes of the three shared sets.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BacklogStats {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
}

/// The shared sets. Only ever touched while the backlog mutex is held.
pub(crate) struct BacklogState<T: BacklogItem> {
    order: ReceptionOrder<T>,
    pending: VecDeque<T>,
    pending_index: HashSet<T>,
    in_flight: HashMap<T, WorkerId>,
    done: HashSet<T>,
    done_order: VecDeque<T>,
    done_capacity: Option<usize>,
    pending_capacity: Option<usize>,
}

impl<T: BacklogItem> fmt::Debug for BacklogState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacklogState")
            .field("order", &self.order)
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .field("done", &self.done.len())
            .field("done_capacity", &self.done_capacity)
            .field("pending_capacity", &self.pending_capacity)
            .finish()
    }
}

impl<T: BacklogItem> BacklogState<T> {
    pub(crate) fn new(
        order: ReceptionOrder<T>,
        done_capacity: Option<usize>,
        pending_capacity: Option<usize>,
    ) -> Self {
        Self {
            order,
            pending: VecDeque::new(),
            pending_index: HashSet::new(),
            in_flight: HashMap::new(),
            done: HashSet::new(),
            done_order: VecDeque::new(),
            done_capacity,
            pending_capacity: pending_capacity.filter(|cap| *cap > 0),
        }
    }

    pub(crate) fn stats(&self) -> BacklogStats {
        BacklogStats {
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            done: self.done.len(),
        }
    }

    pub(crate) fn pending_items(&self) -> Vec<T> {
        self.pending.iter().cloned().collect()
    }

    pub(crate) fn is_pending_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn is_in_flight(&self, item: &T) -> bool {
        self.in_flight.contains_key(item)
    }

    pub(crate) fn is_done(&self, item: &T) -> bool {
        self.done.contains(item)
    }

    pub(crate) fn reconcile(&mut self, snapshot: Vec<T>) -> ReconcileSummary {
        let present: HashSet<T> = snapshot.iter().cloned().collect();

        let pending_before = self.pending.len();
        self.pending.retain(|item| present.contains(item));
        self.pending_index.retain(|item| present.contains(item));
        let vanished_pending = pending_before - self.pending.len();

        let done_before = self.done.len();
        self.done.retain(|item| present.contains(item));
        self.done_order.retain(|item| present.contains(item));
        let vanished_done = done_before - self.done.len();

        let mut admitted = 0;
        let mut deferred = 0;
        for item in snapshot {
            if self.pending_index.contains(&item)
                || self.in_flight.contains_key(&item)
                || self.done.contains(&item)
            {
                continue;
            }
            if let Some(cap) = self.pending_capacity
                && self.pending.len() >= cap
            {
                deferred += 1;
                continue;
            }
            self.push_pending(item);
            admitted += 1;
        }

        ReconcileSummary {
            admitted,
            deferred,
            vanished_pending,
            vanished_done,
            pending: self.pending.len(),
        }
    }

    pub(crate) fn reserve(&mut self, worker: WorkerId, max: Option<usize>) -> Vec<T> {
        let take = max.map_or(self.pending.len(), |max| max.min(self.pending.len()));
        let mut reserved = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(item) = self.pending.pop_front() else {
                break;
            };
            self.pending_index.remove(&item);
            self.in_flight.insert(item.clone(), worker);
            reserved.push(item);
        }
        reserved
    }

    pub(crate) fn complete(&mut self, items: &[T]) {
        for item in items {
            self.in_flight.remove(item);
            self.insert_done(item.clone());
        }
    }

    /// Returns how many items went back to `pending`. Released items keep
    /// their reservation order ahead of anything still pending, so they are
    /// the next to be reserved. Items completed in the meantime through
    /// `mark_processed` stay done.
    pub(crate) fn release(&mut self, items: Vec<T>) -> usize {
        let mut requeue = Vec::with_capacity(items.len());
        for item in items {
            self.in_flight.remove(&item);
            if self.done.contains(&item) || self.pending_index.contains(&item) {
                continue;
            }
            self.pending_index.insert(item.clone());
            requeue.push(item);
        }
        let requeued = requeue.len();

        if self.order.comparator().is_some() {
            for item in requeue {
                self.pending_index.remove(&item);
                self.push_pending(item);
            }
        } else {
            for item in requeue.into_iter().rev() {
                self.pending.push_front(item);
            }
        }
        requeued
    }

    pub(crate) fn mark_processed(&mut self, items: &[T]) {
        let mut removed_pending = false;
        for item in items {
            removed_pending |= self.pending_index.remove(item);
            self.in_flight.remove(item);
            self.insert_done(item.clone());
        }
        if removed_pending {
            let index = &self.pending_index;
            self.pending.retain(|item| index.contains(item));
        }
    }

    fn push_pending(&mut self, item: T) {
        self.pending_index.insert(item.clone());
        match self.order.comparator() {
            None => self.pending.push_back(item),
            Some(compare) => {
                let at = self
                    .pending
                    .partition_point(|queued| compare(queued, &item) != std::cmp::Ordering::Greater);
                self.pending.insert(at, item);
            }
        }
    }

    fn insert_done(&mut self, item: T) {
        if !self.done.insert(item.clone()) {
            return;
        }
        self.done_order.push_back(item);
        if let Some(cap) = self.done_capacity {
            while self.done.len() > cap {
                let Some(evicted) = self.done_order.pop_front() else {
                    break;
                };
                self.done.remove(&evicted);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_disjoint(&self) {
        for item in &self.pending {
            assert!(
                !self.in_flight.contains_key(item),
                "{item:?} is both pending and in flight"
            );
        }
        assert_eq!(self.pending.len(), self.pending_index.len());
        assert_eq!(self.done.len(), self.done_order.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(order: ReceptionOrder<&'static str>) -> BacklogState<&'static str> {
        BacklogState::new(order, None, None)
    }

    #[test]
    fn reconcile_admits_in_snapshot_order_and_dedupes() {
        let mut s = state(ReceptionOrder::Insertion);
        let summary = s.reconcile(vec!["b", "a", "b", "c"]);
        assert_eq!(summary.admitted, 3);
        assert_eq!(s.pending_items(), ["b", "a", "c"]);
        s.assert_disjoint();
    }

    #[test]
    fn comparator_order_inserts_sorted() {
        let mut s = state(ReceptionOrder::natural());
        s.reconcile(vec!["c", "a", "b"]);
        assert_eq!(s.pending_items(), ["a", "b", "c"]);
    }

    #[test]
    fn vanished_items_leave_pending_and_done() {
        let mut s = state(ReceptionOrder::Insertion);
        let worker = WorkerId::new();
        s.reconcile(vec!["a", "b", "c"]);
        let reserved = s.reserve(worker, Some(1));
        s.complete(&reserved);

        let summary = s.reconcile(vec!["c"]);
        assert_eq!(summary.vanished_pending, 1);
        assert_eq!(summary.vanished_done, 1);
        assert_eq!(s.stats(), BacklogStats { pending: 1, in_flight: 0, done: 0 });
    }

    #[test]
    fn in_flight_items_survive_vanishing() {
        let mut s = state(ReceptionOrder::Insertion);
        let worker = WorkerId::new();
        s.reconcile(vec!["a"]);
        let reserved = s.reserve(worker, None);
        s.reconcile(Vec::new());
        assert!(s.is_in_flight(&"a"));
        assert_eq!(s.release(reserved), 1);
        assert_eq!(s.pending_items(), ["a"]);
    }

    #[test]
    fn done_capacity_evicts_oldest_completion() {
        let mut s = BacklogState::new(ReceptionOrder::Insertion, Some(2), None);
        let worker = WorkerId::new();
        s.reconcile(vec!["a", "b", "c"]);
        let reserved = s.reserve(worker, None);
        s.complete(&reserved);
        assert!(!s.is_done(&"a"));
        assert!(s.is_done(&"b"));
        assert!(s.is_done(&"c"));
        s.assert_disjoint();
    }

    #[test]
    fn pending_capacity_defers_overflow() {
        let mut s = BacklogState::new(ReceptionOrder::Insertion, None, Some(2));
        let summary = s.reconcile(vec!["a", "b", "c"]);
        assert_eq!(summary.admitted, 2);
        assert_eq!(summary.deferred, 1);

        let worker = WorkerId::new();
        let reserved = s.reserve(worker, None);
        s.complete(&reserved);
        let summary = s.reconcile(vec!["a", "b", "c"]);
        assert_eq!(summary.admitted, 1);
        assert_eq!(s.pending_items(), ["c"]);
    }

    #[test]
    fn released_items_go_back_ahead_of_newer_pending() {
        let mut s = state(ReceptionOrder::Insertion);
        let worker = WorkerId::new();
        s.reconcile(vec!["a", "b", "c", "d"]);
        let reserved = s.reserve(worker, Some(2));
        s.mark_processed(&["a"]);
        assert_eq!(s.release(reserved), 1);
        assert_eq!(s.pending_items(), ["b", "c", "d"]);

        let reserved = s.reserve(worker, Some(2));
        s.reconcile(vec!["a", "b", "c", "d", "e"]);
        assert_eq!(s.release(reserved), 2);
        assert_eq!(s.pending_items(), ["b", "c", "d", "e"]);
        s.assert_disjoint();
    }

    #[test]
    fn release_skips_items_completed_out_of_band() {
        let mut s = state(ReceptionOrder::Insertion);
        let worker = WorkerId::new();
        s.reconcile(vec!["a", "b"]);
        let reserved = s.reserve(worker, None);
        s.mark_processed(&["a"]);
        assert_eq!(s.release(reserved), 1);
        assert_eq!(s.pending_items(), ["b"]);
        assert!(s.is_done(&"a"));
    }
}
