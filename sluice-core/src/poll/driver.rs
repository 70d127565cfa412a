use std::any::type_name_of_val;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::backlog::{Backlog, BacklogWorker, BatchLimit, ReconcileSummary, Reservation, WorkerId};
use crate::config::{AckMode, OverlapPolicy, PollerConfig, RescanPolicy};
use crate::dispatcher::{DispatchReport, Dispatcher, ItemOutcome};
use crate::error::{Result, SluiceError};
use crate::events::{EventMeta, NoopEventPublisher, PollEvent, PollEventPayload, PollEventPublisher};
use crate::filter::{AcceptAll, SnapshotFilter};
use crate::item::BacklogItem;
use crate::source::SnapshotProvider;

/// Per-tick behaviour, usually derived from a [`PollerConfig`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TickSettings {
    pub reserve_limit: BatchLimit,
    pub rescan: RescanPolicy,
    pub ack_mode: AckMode,
    pub overlap: OverlapPolicy,
    pub process_timeout: Option<Duration>,
}

impl Default for TickSettings {
    fn default() -> Self {
        TickSettings::from(&PollerConfig::default())
    }
}

impl From<&PollerConfig> for TickSettings {
    fn from(config: &PollerConfig) -> Self {
        Self {
            reserve_limit: config.reserve_limit(),
            rescan: config.rescan,
            ack_mode: config.ack_mode,
            overlap: config.overlap,
            process_timeout: config.process_timeout(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// A batch was reserved, processed and acknowledged.
    Completed,
    /// Nothing was pending after reconciliation.
    Idle,
    /// Listing failed; the backlog was left untouched.
    SourceUnavailable,
    /// The PROCESS stage exceeded its timeout; the reservation was failed.
    TimedOut,
    /// Another tick of this driver was running and overlap is disallowed.
    Overlapped,
}

/// What one tick did.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub worker: WorkerId,
    pub outcome: TickOutcome,
    /// Listing size, when the source was listed this tick.
    pub listed: Option<usize>,
    pub reconcile: Option<ReconcileSummary>,
    pub reserved: usize,
    pub processed: usize,
    pub failed: usize,
    /// Items handed back to `pending` at the end of the tick.
    pub returned: usize,
}

impl TickReport {
    fn new(tick_id: Uuid, worker: WorkerId, outcome: TickOutcome) -> Self {
        Self {
            tick_id,
            worker,
            outcome,
            listed: None,
            reconcile: None,
            reserved: 0,
            processed: 0,
            failed: 0,
            returned: 0,
        }
    }
}

/// Runs poll ticks for one adapter.
///
/// A driver is shared by all of an adapter's workers; each worker brings its
/// own [`BacklogWorker`] to [`PollDriver::tick_with`]. [`PollDriver::tick`]
/// uses a throwaway context, which is enough when ticks are driven from a
/// single place.
///
/// Only bookkeeping defects ([`SluiceError::is_fatal`]) escape a tick. Source
/// outages and per-item failures are logged, published as events and folded
/// into the [`TickReport`].
pub struct PollDriver<T: BacklogItem> {
    name: String,
    source: Arc<dyn SnapshotProvider<T>>,
    filter: Arc<dyn SnapshotFilter<T>>,
    backlog: Backlog<T>,
    dispatcher: Arc<Dispatcher<T>>,
    events: Arc<dyn PollEventPublisher>,
    settings: TickSettings,
    tick_gate: Mutex<()>,
}

impl<T: BacklogItem> fmt::Debug for PollDriver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollDriver")
            .field("name", &self.name)
            .field("source_type", &type_name_of_val(self.source.as_ref()))
            .field("backlog", &self.backlog)
            .field("dispatcher", &self.dispatcher)
            .field("settings", &self.settings)
            .field("tick_running", &self.tick_gate.try_lock().is_err())
            .finish()
    }
}

impl<T: BacklogItem> PollDriver<T> {
    pub fn builder(name: impl Into<String>) -> PollDriverBuilder<T> {
        PollDriverBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backlog(&self) -> &Backlog<T> {
        &self.backlog
    }

    pub fn settings(&self) -> TickSettings {
        self.settings
    }

    /// One tick with a fresh worker context.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut worker = self.backlog.worker();
        self.tick_with(&mut worker).await
    }

    /// One tick using a long-lived worker context.
    pub async fn tick_with(&self, worker: &mut BacklogWorker<T>) -> Result<TickReport> {
        let tick_id = Uuid::now_v7();
        let _gate = match self.settings.overlap {
            OverlapPolicy::Allow => None,
            OverlapPolicy::Skip => match self.tick_gate.try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    debug!(target: "sluice::poll", poller = %self.name, "tick skipped, previous tick still running");
                    return Ok(TickReport::new(tick_id, worker.id(), TickOutcome::Overlapped));
                }
            },
        };

        let span = info_span!("tick", poller = %self.name, tick = %tick_id, worker = %worker.id());
        self.run_tick(tick_id, worker).instrument(span).await
    }

    async fn run_tick(&self, tick_id: Uuid, worker: &mut BacklogWorker<T>) -> Result<TickReport> {
        let worker_id = worker.id();
        let mut report = TickReport::new(tick_id, worker_id, TickOutcome::Completed);
        self.emit(tick_id, worker_id, PollEventPayload::TickStarted).await;

        // SNAPSHOT + RECONCILE
        if self.should_list(worker)? {
            let listing = match self.source.list_current_items().await {
                Ok(listing) => listing,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(target: "sluice::poll", error = %err, "snapshot failed, skipping tick");
                    self.emit(
                        tick_id,
                        worker_id,
                        PollEventPayload::SnapshotFailed { error: err.to_string() },
                    )
                    .await;
                    report.outcome = TickOutcome::SourceUnavailable;
                    return Ok(report);
                }
            };
            let listed = listing.len();
            let accepted = self.filter.filter(listing);
            let summary = worker.reconcile(accepted)?;
            report.listed = Some(listed);
            report.reconcile = Some(summary);
            self.emit(tick_id, worker_id, PollEventPayload::Reconciled { listed, summary })
                .await;
        }

        // RESERVE
        let mut reservation = worker.reserve_scoped(self.settings.reserve_limit)?;
        if reservation.is_empty() {
            report.outcome = TickOutcome::Idle;
            return Ok(report);
        }
        let batch = reservation.to_vec();
        report.reserved = batch.len();
        self.emit(tick_id, worker_id, PollEventPayload::Reserved { count: batch.len() })
            .await;

        // PROCESS
        let processing = self.process(&batch, &mut reservation);
        let dispatched = match self.settings.process_timeout {
            Some(limit) => tokio::time::timeout(limit, processing).await.ok(),
            None => Some(processing.await),
        };

        // ACKNOWLEDGE
        let Some(dispatched) = dispatched else {
            let returned = reservation.fail()?;
            warn!(
                target: "sluice::poll",
                reserved = report.reserved,
                returned,
                "processing timed out, reservation returned to pending"
            );
            report.outcome = TickOutcome::TimedOut;
            report.processed = report.reserved - returned;
            report.returned = returned;
            self.emit(tick_id, worker_id, PollEventPayload::TickTimedOut { returned })
                .await;
            return Ok(report);
        };
        let dispatched = dispatched?;
        report.returned = self.acknowledge(reservation, &dispatched)?;
        report.processed = dispatched.delivered.len();
        report.failed = dispatched.failed.len();

        for item in &dispatched.delivered {
            self.emit(
                tick_id,
                worker_id,
                PollEventPayload::ItemProcessed { item: format!("{item:?}") },
            )
            .await;
        }
        for (item, err) in &dispatched.failed {
            self.emit(
                tick_id,
                worker_id,
                PollEventPayload::ItemFailed {
                    item: format!("{item:?}"),
                    error: err.to_string(),
                },
            )
            .await;
        }
        self.emit(
            tick_id,
            worker_id,
            PollEventPayload::TickCompleted {
                processed: report.processed,
                failed: report.failed,
                returned: report.returned,
            },
        )
        .await;

        debug!(
            target: "sluice::poll",
            reserved = report.reserved,
            processed = report.processed,
            failed = report.failed,
            returned = report.returned,
            "tick completed"
        );
        Ok(report)
    }

    fn should_list(&self, worker: &BacklogWorker<T>) -> Result<bool> {
        match self.settings.rescan {
            RescanPolicy::EachPoll => Ok(true),
            RescanPolicy::WhenIdle => worker.is_idle(),
        }
    }

    async fn process(
        &self,
        batch: &[T],
        reservation: &mut Reservation<'_, T>,
    ) -> Result<DispatchReport<T>> {
        match self.settings.ack_mode {
            AckMode::Aggregate => Ok(self.dispatcher.dispatch(batch).await),
            AckMode::PerItem => {
                let (deliverable, held_back) = self.dispatcher.split_batch(batch);
                let mut report = DispatchReport {
                    undelivered: held_back.to_vec(),
                    ..DispatchReport::default()
                };
                for item in deliverable {
                    match self.dispatcher.dispatch_one(item).await {
                        ItemOutcome::Delivered => {
                            reservation.mark_processed(std::slice::from_ref(item))?;
                            report.delivered.push(item.clone());
                        }
                        ItemOutcome::Failed(err) => report.failed.push((item.clone(), err)),
                    }
                }
                Ok(report)
            }
        }
    }

    /// Folds dispatch results back into the backlog. Returns how many items
    /// went back to `pending`.
    fn acknowledge(
        &self,
        mut reservation: Reservation<'_, T>,
        dispatched: &DispatchReport<T>,
    ) -> Result<usize> {
        if self.settings.ack_mode == AckMode::Aggregate {
            if dispatched.all_delivered() {
                reservation.commit()?;
                return Ok(0);
            }
            reservation.mark_processed(&dispatched.delivered)?;
        }
        reservation.fail()
    }

    pub(crate) async fn emit_stopped(&self, worker: WorkerId, error: Option<String>) {
        self.emit(Uuid::now_v7(), worker, PollEventPayload::PollerStopped { error })
            .await;
    }

    async fn emit(&self, tick_id: Uuid, worker: WorkerId, payload: PollEventPayload) {
        let meta = EventMeta::new(self.name.clone(), tick_id, worker);
        if let Err(err) = self.events.publish(PollEvent::new(meta, payload)).await {
            debug!(target: "sluice::poll", error = %err, "failed to publish poll event");
        }
    }
}

/// Assembles a [`PollDriver`].
pub struct PollDriverBuilder<T: BacklogItem> {
    name: String,
    source: Option<Arc<dyn SnapshotProvider<T>>>,
    filter: Arc<dyn SnapshotFilter<T>>,
    backlog: Option<Backlog<T>>,
    dispatcher: Option<Arc<Dispatcher<T>>>,
    events: Arc<dyn PollEventPublisher>,
    settings: TickSettings,
}

impl<T: BacklogItem> fmt::Debug for PollDriverBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollDriverBuilder")
            .field("name", &self.name)
            .field("has_source", &self.source.is_some())
            .field("has_dispatcher", &self.dispatcher.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<T: BacklogItem> PollDriverBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            filter: Arc::new(AcceptAll),
            backlog: None,
            dispatcher: None,
            events: Arc::new(NoopEventPublisher),
            settings: TickSettings::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn SnapshotProvider<T>>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn SnapshotFilter<T>>) -> Self {
        self.filter = filter;
        self
    }

    /// Share an existing backlog. Without one the driver gets a fresh
    /// insertion-ordered backlog.
    pub fn backlog(mut self, backlog: Backlog<T>) -> Self {
        self.backlog = Some(backlog);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher<T>) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn events(mut self, events: Arc<dyn PollEventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn settings(mut self, settings: TickSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<PollDriver<T>> {
        let source = self.source.ok_or_else(|| {
            SluiceError::InvalidConfig(format!("poller {} has no snapshot source", self.name))
        })?;
        let dispatcher = self.dispatcher.ok_or_else(|| {
            SluiceError::InvalidConfig(format!("poller {} has no dispatcher", self.name))
        })?;
        if dispatcher.handler_count() == 0 {
            return Err(SluiceError::InvalidConfig(format!(
                "poller {} has no handlers registered",
                self.name
            )));
        }

        Ok(PollDriver {
            name: self.name,
            source,
            filter: self.filter,
            backlog: self.backlog.unwrap_or_default(),
            dispatcher,
            events: self.events,
            settings: self.settings,
            tick_gate: Mutex::new(()),
        })
    }
}
