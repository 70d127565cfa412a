//! # Sluice Core
//!
//! Backlog tracking and the poll/dispatch cycle for polling-based ingestion:
//! discover items in an external source (a remote directory, a mailbox),
//! remember which ones are waiting, being worked on, or finished, and hand
//! each one to downstream handlers at least once without two workers ever
//! holding the same item.
//!
//! ## Architecture
//!
//! - [`backlog`]: the shared `pending` / `in_flight` / `done` sets and the
//!   per-worker reservation context
//! - [`poll`]: one tick of snapshot, reconcile, reserve, process and
//!   acknowledge, plus trigger policies
//! - [`dispatcher`]: per-item delivery to handlers with failure isolation
//! - [`runtime`]: trigger-driven worker tasks, shutdown and the in-process
//!   event bus
//! - [`source`]: the snapshot and fetch seams, with a local-directory adapter
//! - [`filter`]: listing filters applied before reconciliation
//! - [`config`]: serde-friendly poller settings
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sluice_core::prelude::*;
//!
//! # async fn run() -> sluice_core::error::Result<()> {
//! let source = Arc::new(LocalDirectorySource::new("/srv/inbox"));
//! let driver = PollDriver::<RemoteFile>::builder("inbox")
//!     .source(source.clone())
//!     .dispatcher(
//!         Dispatcher::<RemoteFile>::new(BatchLimit::Unbounded)
//!             .with_fetcher(source)
//!             .with_handler(Arc::new(DirectoryMirrorHandler::new("/srv/archive"))),
//!     )
//!     .backlog(Backlog::new(ReceptionOrder::natural()))
//!     .build()?;
//!
//! let report = driver.tick().await?;
//! println!("processed {} file(s)", report.processed);
//! # Ok(())
//! # }
//! ```

pub mod backlog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filter;
pub mod item;
pub mod poll;
pub mod runtime;
pub mod source;

pub use backlog::{AckOutcome, Backlog, BacklogStats, BacklogWorker, BatchLimit, WorkerId};
pub use error::{Result, SluiceError};
pub use item::{BacklogItem, RemoteFile};

/// Commonly used types.
pub mod prelude {
    pub use crate::backlog::{
        AckOutcome, Backlog, BacklogStats, BacklogWorker, BatchLimit, ReconcileSummary,
        Reservation, WorkerId,
    };
    pub use crate::config::{AckMode, BacklogConfig, OverlapPolicy, PollerConfig, RescanPolicy, TriggerConfig};
    pub use crate::dispatcher::{Delivery, DispatchReport, Dispatcher, Handler, HandlerOutcome};
    pub use crate::error::{Result, SluiceError};
    pub use crate::events::{PollEvent, PollEventPayload, PollEventPublisher};
    pub use crate::filter::{AcceptAll, CompositeFilter, IgnoreHidden, PatternFilter, SnapshotFilter};
    pub use crate::item::{BacklogItem, Named, OrderKind, ReceptionOrder, RemoteFile};
    pub use crate::poll::{
        OneShotTrigger, PeriodicTrigger, PollDriver, TickOutcome, TickReport, TickSettings,
        TriggerPolicy,
    };
    pub use crate::runtime::{InProcPollEventBus, PollEventStream, PollerRuntime, schedule};
    pub use crate::source::{
        ByteStream, DirectoryMirrorHandler, ItemFetcher, LocalDirectorySource, SnapshotProvider,
    };
}
