use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backlog::{ReconcileSummary, WorkerId};
use crate::error::Result;

/// Metadata envelope attached to every poll event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub poller: String,
    pub tick_id: Uuid,
    pub worker: WorkerId,
    pub emitted_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(poller: impl Into<String>, tick_id: Uuid, worker: WorkerId) -> Self {
        Self {
            version: 1,
            poller: poller.into(),
            tick_id,
            worker,
            emitted_at: Utc::now(),
        }
    }
}

/// Lifecycle transitions of one tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PollEventPayload {
    TickStarted,
    SnapshotFailed {
        error: String,
    },
    Reconciled {
        listed: usize,
        summary: ReconcileSummary,
    },
    Reserved {
        count: usize,
    },
    ItemProcessed {
        item: String,
    },
    ItemFailed {
        item: String,
        error: String,
    },
    TickCompleted {
        processed: usize,
        failed: usize,
        returned: usize,
    },
    TickTimedOut {
        returned: usize,
    },
    PollerStopped {
        error: Option<String>,
    },
}

/// Fully qualified poll event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollEvent {
    pub meta: EventMeta,
    pub payload: PollEventPayload,
}

impl PollEvent {
    pub fn new(meta: EventMeta, payload: PollEventPayload) -> Self {
        Self { meta, payload }
    }
}

#[async_trait]
pub trait PollEventPublisher: Send + Sync {
    async fn publish(&self, event: PollEvent) -> Result<()>;
}

/// Publisher that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl PollEventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: PollEvent) -> Result<()> {
        Ok(())
    }
}
