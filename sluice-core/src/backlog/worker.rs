use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{Backlog, ReconcileSummary};
use crate::error::{Result, SluiceError};
use crate::item::BacklogItem;

/// Identity of one worker context. Stands in for "the calling thread".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many items a reservation may take. Zero or negative counts mean
/// "everything pending".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BatchLimit {
    #[default]
    Unbounded,
    AtMost(usize),
}

impl BatchLimit {
    pub fn max(self) -> Option<usize> {
        match self {
            BatchLimit::Unbounded => None,
            BatchLimit::AtMost(n) => Some(n),
        }
    }

    pub fn is_unbounded(self) -> bool {
        matches!(self, BatchLimit::Unbounded)
    }

    /// The tighter of two limits.
    pub fn min(self, other: BatchLimit) -> BatchLimit {
        match (self.max(), other.max()) {
            (None, None) => BatchLimit::Unbounded,
            (Some(a), None) | (None, Some(a)) => BatchLimit::AtMost(a),
            (Some(a), Some(b)) => BatchLimit::AtMost(a.min(b)),
        }
    }
}

impl From<i64> for BatchLimit {
    fn from(value: i64) -> Self {
        if value <= 0 {
            BatchLimit::Unbounded
        } else {
            BatchLimit::AtMost(usize::try_from(value).unwrap_or(usize::MAX))
        }
    }
}

impl From<i32> for BatchLimit {
    fn from(value: i32) -> Self {
        BatchLimit::from(i64::from(value))
    }
}

impl From<usize> for BatchLimit {
    fn from(value: usize) -> Self {
        if value == 0 {
            BatchLimit::Unbounded
        } else {
            BatchLimit::AtMost(value)
        }
    }
}

/// Outcome reported for everything currently reserved by a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AckOutcome {
    Success,
    Failure,
}

/// Per-worker context over a shared [`Backlog`].
///
/// The worker owns its reservation buffer, so only the owning task reads or
/// writes it and no locking is needed for it. All shared-set mutations go
/// through the backlog's lock. Dropping a worker with items still reserved
/// returns them to `pending`.
pub struct BacklogWorker<T: BacklogItem> {
    id: WorkerId,
    backlog: Backlog<T>,
    buffer: Vec<T>,
}

impl<T: BacklogItem> fmt::Debug for BacklogWorker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacklogWorker")
            .field("id", &self.id)
            .field("reserved", &self.buffer.len())
            .field("backlog", &self.backlog)
            .finish()
    }
}

impl<T: BacklogItem> BacklogWorker<T> {
    pub(crate) fn new(backlog: Backlog<T>) -> Self {
        Self {
            id: WorkerId::new(),
            backlog,
            buffer: Vec::new(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn backlog(&self) -> &Backlog<T> {
        &self.backlog
    }

    /// Items this worker currently holds, in reservation order.
    pub fn reserved(&self) -> &[T] {
        &self.buffer
    }

    /// Reconcile the shared backlog against a fresh listing.
    ///
    /// Fails with [`SluiceError::ReservationNotDrained`] without touching any
    /// state when this worker still holds unacknowledged items.
    pub fn reconcile<I>(&mut self, snapshot: I) -> Result<ReconcileSummary>
    where
        I: IntoIterator<Item = T>,
    {
        if !self.buffer.is_empty() {
            error!(
                target: "sluice::backlog",
                worker = %self.id,
                outstanding = self.buffer.len(),
                "reconcile attempted with undrained reservation"
            );
            return Err(SluiceError::ReservationNotDrained {
                worker: self.id,
                outstanding: self.buffer.len(),
            });
        }

        let snapshot: Vec<T> = snapshot.into_iter().collect();
        let listed = snapshot.len();
        let summary = self.backlog.lock()?.reconcile(snapshot);
        debug!(
            target: "sluice::backlog",
            worker = %self.id,
            listed,
            admitted = summary.admitted,
            deferred = summary.deferred,
            vanished_pending = summary.vanished_pending,
            vanished_done = summary.vanished_done,
            pending = summary.pending,
            "snapshot reconciled"
        );
        Ok(summary)
    }

    /// Move up to `limit` items from the front of `pending` into this
    /// worker's buffer and returns a view of the whole buffer.
    pub fn reserve(&mut self, limit: impl Into<BatchLimit>) -> Result<&[T]> {
        let limit = limit.into();
        let reserved = self.backlog.lock()?.reserve(self.id, limit.max());
        if !reserved.is_empty() {
            debug!(
                target: "sluice::backlog",
                worker = %self.id,
                reserved = reserved.len(),
                "items reserved"
            );
        }
        self.buffer.extend(reserved);
        Ok(&self.buffer)
    }

    /// Reserve with drop-guaranteed release: a [`Reservation`] that is
    /// neither committed nor failed is acknowledged as a failure when it goes
    /// out of scope.
    pub fn reserve_scoped(&mut self, limit: impl Into<BatchLimit>) -> Result<Reservation<'_, T>> {
        self.reserve(limit)?;
        Ok(Reservation {
            worker: self,
            settled: false,
        })
    }

    /// Settle everything in the buffer. Returns the number of items that left
    /// the buffer; an empty buffer is a no-op.
    pub fn acknowledge(&mut self, outcome: AckOutcome) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let count = self.buffer.len();
        {
            let mut state = self.backlog.lock()?;
            match outcome {
                AckOutcome::Success => state.complete(&self.buffer),
                AckOutcome::Failure => {
                    state.release(std::mem::take(&mut self.buffer));
                }
            }
        }
        self.buffer.clear();
        debug!(
            target: "sluice::backlog",
            worker = %self.id,
            count,
            outcome = ?outcome,
            "reservation acknowledged"
        );
        Ok(count)
    }

    /// Record `items` as durably handled outside the reserve/acknowledge
    /// cycle. They move to `done` wherever they currently are.
    pub fn mark_processed(&mut self, items: &[T]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.backlog.lock()?.mark_processed(items);
        let marked: HashSet<&T> = items.iter().collect();
        self.buffer.retain(|held| !marked.contains(held));
        Ok(())
    }

    /// True when nothing is pending and this worker holds nothing. Says
    /// nothing about other workers.
    pub fn is_idle(&self) -> Result<bool> {
        if !self.buffer.is_empty() {
            return Ok(false);
        }
        Ok(self.backlog.lock()?.is_pending_empty())
    }
}

impl<T: BacklogItem> Drop for BacklogWorker<T> {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        warn!(
            target: "sluice::backlog",
            worker = %self.id,
            outstanding = self.buffer.len(),
            "worker dropped with reserved items, returning them to pending"
        );
        if let Err(err) = self.acknowledge(AckOutcome::Failure) {
            error!(target: "sluice::backlog", worker = %self.id, error = %err, "failed to release reservation on drop");
        }
    }
}

/// Scoped claim on a worker's reserved items.
pub struct Reservation<'a, T: BacklogItem> {
    worker: &'a mut BacklogWorker<T>,
    settled: bool,
}

impl<T: BacklogItem> fmt::Debug for Reservation<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("worker", &self.worker.id)
            .field("items", &self.worker.buffer.len())
            .field("settled", &self.settled)
            .finish()
    }
}

impl<T: BacklogItem> Reservation<'_, T> {
    pub fn worker_id(&self) -> WorkerId {
        self.worker.id
    }

    pub fn mark_processed(&mut self, items: &[T]) -> Result<()> {
        self.worker.mark_processed(items)
    }

    pub fn commit(mut self) -> Result<usize> {
        self.settled = true;
        self.worker.acknowledge(AckOutcome::Success)
    }

    pub fn fail(mut self) -> Result<usize> {
        self.settled = true;
        self.worker.acknowledge(AckOutcome::Failure)
    }
}

impl<T: BacklogItem> Deref for Reservation<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.worker.reserved()
    }
}

impl<T: BacklogItem> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if self.settled || self.worker.buffer.is_empty() {
            return;
        }
        debug!(
            target: "sluice::backlog",
            worker = %self.worker.id,
            outstanding = self.worker.buffer.len(),
            "reservation abandoned, acknowledging as failure"
        );
        if let Err(err) = self.worker.acknowledge(AckOutcome::Failure) {
            error!(target: "sluice::backlog", worker = %self.worker.id, error = %err, "failed to release abandoned reservation");
        }
    }
}
