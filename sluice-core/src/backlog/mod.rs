//! Backlog tracking for polled items.
//!
//! A [`Backlog`] owns three shared sets behind one mutex: `pending` (seen, not
//! yet reserved), `in_flight` (reserved by some worker) and `done`
//! (successfully processed, kept so that items still present in later
//! listings are not processed again). Workers interact with it through a
//! [`BacklogWorker`], which owns that worker's reservation buffer.
//!
//! Every operation takes the lock once, does work proportional to the
//! snapshot or batch size, and releases it. No I/O ever happens under the
//! lock.

mod state;
mod worker;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub use state::{BacklogStats, ReconcileSummary};
pub use worker::{AckOutcome, BacklogWorker, BatchLimit, Reservation, WorkerId};

use crate::config::BacklogConfig;
use crate::error::{Result, SluiceError};
use crate::item::{BacklogItem, ReceptionOrder};
use state::BacklogState;

/// Shared, cloneable handle to one adapter's backlog.
pub struct Backlog<T: BacklogItem> {
    state: Arc<Mutex<BacklogState<T>>>,
}

impl<T: BacklogItem> Clone for Backlog<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: BacklogItem> fmt::Debug for Backlog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Backlog");
        match self.state.try_lock() {
            Ok(state) => {
                let stats = state.stats();
                debug
                    .field("pending", &stats.pending)
                    .field("in_flight", &stats.in_flight)
                    .field("done", &stats.done);
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl<T: BacklogItem> Default for Backlog<T> {
    fn default() -> Self {
        Self::new(ReceptionOrder::Insertion)
    }
}

impl<T: BacklogItem> Backlog<T> {
    pub fn new(order: ReceptionOrder<T>) -> Self {
        Self::with_limits(order, None, None)
    }

    /// `done_capacity` bounds the completed set (oldest completions are
    /// forgotten first); `pending_capacity` bounds how many items may wait in
    /// `pending` at once.
    pub fn with_limits(
        order: ReceptionOrder<T>,
        done_capacity: Option<usize>,
        pending_capacity: Option<usize>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(BacklogState::new(
                order,
                done_capacity,
                pending_capacity,
            ))),
        }
    }

    pub fn with_config(order: ReceptionOrder<T>, config: &BacklogConfig) -> Self {
        Self::with_limits(order, config.done_capacity, config.pending_capacity)
    }

    pub fn from_config(config: &BacklogConfig) -> Self
    where
        T: Ord,
    {
        Self::with_config(ReceptionOrder::from_kind(config.order), config)
    }

    /// New worker context with its own, empty reservation buffer.
    pub fn worker(&self) -> BacklogWorker<T> {
        BacklogWorker::new(self.clone())
    }

    pub fn stats(&self) -> Result<BacklogStats> {
        Ok(self.lock()?.stats())
    }

    /// Copy of `pending` in reservation order.
    pub fn pending_items(&self) -> Result<Vec<T>> {
        Ok(self.lock()?.pending_items())
    }

    pub fn is_in_flight(&self, item: &T) -> Result<bool> {
        Ok(self.lock()?.is_in_flight(item))
    }

    pub fn is_done(&self, item: &T) -> Result<bool> {
        Ok(self.lock()?.is_done(item))
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, BacklogState<T>>> {
        self.state.lock().map_err(|_| SluiceError::LockPoisoned)
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        self.state
            .lock()
            .expect("backlog lock")
            .assert_disjoint();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::item::RemoteFile;

    fn file(name: &str) -> RemoteFile {
        RemoteFile::new(name, 1, 1_000)
    }

    #[test]
    fn reconciling_the_same_snapshot_twice_is_idempotent() -> Result<()> {
        let backlog = Backlog::default();
        let mut worker = backlog.worker();
        let snapshot = vec![file("a"), file("b"), file("c")];

        worker.reconcile(snapshot.clone())?;
        let first = backlog.pending_items()?;
        worker.reconcile(snapshot)?;
        assert_eq!(backlog.pending_items()?, first);
        Ok(())
    }

    #[test]
    fn success_then_growing_snapshot_only_queues_new_items() -> Result<()> {
        let backlog = Backlog::default();
        let mut worker = backlog.worker();
        let (a, b, c, d) = (file("A"), file("B"), file("C"), file("D"));

        worker.reconcile(vec![a.clone(), b.clone(), c.clone()])?;
        assert_eq!(backlog.pending_items()?, [a.clone(), b.clone(), c.clone()]);

        assert_eq!(worker.reserve(2)?, [a.clone(), b.clone()]);
        assert_eq!(backlog.pending_items()?, [c.clone()]);
        assert!(backlog.is_in_flight(&a)? && backlog.is_in_flight(&b)?);

        assert_eq!(worker.acknowledge(AckOutcome::Success)?, 2);
        assert_eq!(
            backlog.stats()?,
            BacklogStats { pending: 1, in_flight: 0, done: 2 }
        );

        worker.reconcile(vec![a, b, c.clone(), d.clone()])?;
        assert_eq!(backlog.pending_items()?, [c, d]);
        backlog.assert_invariants();
        Ok(())
    }

    #[test]
    fn failed_reservation_is_retried() -> Result<()> {
        let backlog = Backlog::default();
        let mut worker = backlog.worker();
        let c = file("C");
        worker.reconcile(vec![c.clone()])?;

        assert_eq!(worker.reserve(1)?, [c.clone()]);
        assert!(backlog.is_in_flight(&c)?);

        worker.acknowledge(AckOutcome::Failure)?;
        assert_eq!(backlog.pending_items()?, [c.clone()]);
        assert!(!backlog.is_in_flight(&c)?);

        assert_eq!(worker.reserve(1)?, [c]);
        Ok(())
    }

    #[test]
    fn reconcile_with_undrained_buffer_fails_and_changes_nothing() -> Result<()> {
        let backlog = Backlog::default();
        let mut worker = backlog.worker();
        let (a, b) = (file("A"), file("B"));
        worker.reconcile(vec![a.clone()])?;
        assert_eq!(worker.reserve(-1)?, [a.clone()]);

        let before = backlog.stats()?;
        let err = worker.reconcile(vec![a, b]).unwrap_err();
        assert!(matches!(
            err,
            SluiceError::ReservationNotDrained { outstanding: 1, .. }
        ));
        assert_eq!(backlog.stats()?, before);
        Ok(())
    }

    #[test]
    fn acknowledge_with_nothing_reserved_is_a_no_op() -> Result<()> {
        let backlog: Backlog<RemoteFile> = Backlog::default();
        let mut worker = backlog.worker();
        assert_eq!(worker.acknowledge(AckOutcome::Success)?, 0);
        assert_eq!(worker.acknowledge(AckOutcome::Failure)?, 0);
        Ok(())
    }

    #[test]
    fn mark_processed_bypasses_reservation() -> Result<()> {
        let backlog = Backlog::default();
        let mut worker = backlog.worker();
        let (a, b, c) = (file("A"), file("B"), file("C"));
        worker.reconcile(vec![a.clone(), b.clone(), c.clone()])?;
        worker.reserve(1)?;

        worker.mark_processed(&[a.clone(), c.clone()])?;
        assert!(worker.reserved().is_empty());
        assert_eq!(backlog.pending_items()?, [b.clone()]);
        assert!(backlog.is_done(&a)? && backlog.is_done(&c)?);

        worker.reconcile(vec![a, b.clone(), c])?;
        assert_eq!(backlog.pending_items()?, [b]);
        Ok(())
    }

    #[test]
    fn mark_processed_handles_large_batches() -> Result<()> {
        let backlog: Backlog<u32> = Backlog::default();
        let mut worker = backlog.worker();
        worker.reconcile(0..20_000)?;
        worker.reserve(BatchLimit::Unbounded)?;

        let delivered: Vec<u32> = (1..20_000).collect();
        worker.mark_processed(&delivered)?;
        assert_eq!(worker.reserved(), [0]);
        assert_eq!(worker.acknowledge(AckOutcome::Failure)?, 1);
        assert_eq!(
            backlog.stats()?,
            BacklogStats { pending: 1, in_flight: 0, done: 19_999 }
        );
        Ok(())
    }

    #[test]
    fn failed_reservation_is_reserved_again_before_newer_items() -> Result<()> {
        let backlog = Backlog::default();
        let mut worker = backlog.worker();
        let (a, b, c, d) = (file("A"), file("B"), file("C"), file("D"));
        worker.reconcile(vec![a.clone(), b.clone(), c.clone(), d.clone()])?;

        worker.reserve(2)?;
        worker.mark_processed(std::slice::from_ref(&a))?;
        assert_eq!(worker.acknowledge(AckOutcome::Failure)?, 1);
        assert_eq!(backlog.pending_items()?, [b.clone(), c, d]);
        assert_eq!(worker.reserve(1)?, [b]);
        Ok(())
    }

    #[test]
    fn idleness_is_relative_to_the_worker() -> Result<()> {
        let backlog = Backlog::default();
        let mut busy = backlog.worker();
        let other = backlog.worker();
        busy.reconcile(vec![file("A")])?;
        assert!(!other.is_idle()?);

        busy.reserve(BatchLimit::Unbounded)?;
        assert!(!busy.is_idle()?);
        assert!(other.is_idle()?);

        busy.acknowledge(AckOutcome::Success)?;
        assert!(busy.is_idle()?);
        Ok(())
    }

    #[test]
    fn dropping_a_worker_releases_its_reservation() -> Result<()> {
        let backlog = Backlog::default();
        let a = file("A");
        {
            let mut worker = backlog.worker();
            worker.reconcile(vec![a.clone()])?;
            worker.reserve(1)?;
        }
        assert_eq!(backlog.pending_items()?, [a]);
        assert_eq!(backlog.stats()?.in_flight, 0);
        Ok(())
    }

    #[test]
    fn abandoned_scoped_reservation_fails_back_to_pending() -> Result<()> {
        let backlog = Backlog::default();
        let mut worker = backlog.worker();
        let (a, b) = (file("A"), file("B"));
        worker.reconcile(vec![a.clone(), b.clone()])?;

        {
            let reservation = worker.reserve_scoped(1)?;
            assert_eq!(&*reservation, [a.clone()]);
        }
        assert!(worker.reserved().is_empty());
        assert_eq!(backlog.pending_items()?, [a.clone(), b.clone()]);

        let reservation = worker.reserve_scoped(BatchLimit::Unbounded)?;
        assert_eq!(reservation.commit()?, 2);
        assert!(backlog.is_done(&a)? && backlog.is_done(&b)?);
        Ok(())
    }

    #[test]
    fn concurrent_workers_never_share_items() {
        let backlog: Backlog<u32> = Backlog::default();
        {
            let mut seeder = backlog.worker();
            seeder.reconcile(0..1_000).expect("seed");
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backlog = backlog.clone();
                std::thread::spawn(move || {
                    let mut worker = backlog.worker();
                    let mut seen = Vec::new();
                    loop {
                        let batch = worker.reserve(7).expect("reserve").to_vec();
                        if batch.is_empty() {
                            break;
                        }
                        seen.extend(batch);
                        worker.acknowledge(AckOutcome::Success).expect("ack");
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        let mut total = 0;
        for handle in handles {
            let seen = handle.join().expect("worker thread");
            total += seen.len();
            all.extend(seen);
        }
        assert_eq!(total, 1_000);
        assert_eq!(all.len(), 1_000);
        assert_eq!(
            backlog.stats().expect("stats"),
            BacklogStats { pending: 0, in_flight: 0, done: 1_000 }
        );
        backlog.assert_invariants();
    }
}
