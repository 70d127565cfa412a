use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backlog::BatchLimit;
use crate::item::OrderKind;

/// Knobs that tune one poller.
///
/// All fields carry defaults so a deployment only needs to spell out what it
/// changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Items reserved per tick. Zero or negative reserves everything pending.
    pub max_items_per_poll: i64,
    /// Items the dispatcher delivers per tick. Zero or negative is unlimited.
    pub max_items_per_task: i64,
    /// Worker tasks the runtime spawns for this poller.
    pub concurrency: usize,
    /// Whether ticks of the same poller may overlap.
    pub overlap: OverlapPolicy,
    /// When a tick lists the source.
    pub rescan: RescanPolicy,
    /// How dispatch outcomes are folded back into the backlog.
    pub ack_mode: AckMode,
    pub trigger: TriggerConfig,
    /// Upper bound for the PROCESS stage of a tick.
    pub process_timeout_ms: Option<u64>,
    pub backlog: BacklogConfig,
    /// How long `shutdown` waits for each worker task.
    pub shutdown_timeout_ms: u64,
    /// Capacity of the in-process event channel.
    pub event_channel_capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_items_per_poll: 10,
            max_items_per_task: 10,
            concurrency: 1,
            overlap: OverlapPolicy::default(),
            rescan: RescanPolicy::default(),
            ack_mode: AckMode::default(),
            trigger: TriggerConfig::default(),
            process_timeout_ms: None,
            backlog: BacklogConfig::default(),
            shutdown_timeout_ms: 30_000,
            event_channel_capacity: 256,
        }
    }
}

impl PollerConfig {
    pub fn reserve_limit(&self) -> BatchLimit {
        BatchLimit::from(self.max_items_per_poll)
    }

    pub fn task_limit(&self) -> BatchLimit {
        BatchLimit::from(self.max_items_per_task)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Overlapping ticks for the same poller.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Every tick runs, even while another is still in progress.
    Allow,
    /// A tick that finds another one running returns immediately.
    #[default]
    Skip,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescanPolicy {
    /// List the source on every tick.
    #[default]
    EachPoll,
    /// List the source only when nothing is pending; otherwise drain first.
    WhenIdle,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// One acknowledgement per tick, split only when some items failed.
    #[default]
    Aggregate,
    /// Successful items are marked processed as soon as they complete.
    PerItem,
}

/// Serializable trigger description.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    FixedRate {
        period_ms: u64,
        #[serde(default)]
        initial_delay_ms: u64,
    },
    FixedDelay {
        delay_ms: u64,
        #[serde(default)]
        initial_delay_ms: u64,
    },
    Once {
        #[serde(default)]
        delay_ms: u64,
    },
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig::FixedDelay {
            delay_ms: Self::default_period_ms(),
            initial_delay_ms: 0,
        }
    }
}

impl TriggerConfig {
    const fn default_period_ms() -> u64 {
        10_000
    }

    /// Period or delay between ticks; `None` for one-shot triggers.
    pub fn period_ms(&self) -> Option<u64> {
        match self {
            TriggerConfig::FixedRate { period_ms, .. } => Some(*period_ms),
            TriggerConfig::FixedDelay { delay_ms, .. } => Some(*delay_ms),
            TriggerConfig::Once { .. } => None,
        }
    }
}

/// Backlog sizing and ordering.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    pub order: OrderKind,
    /// Completed items remembered for duplicate suppression. `None` keeps
    /// every completed item still present in the source listing.
    pub done_capacity: Option<usize>,
    /// Items allowed to wait in `pending` at once. `None` is unbounded.
    pub pending_capacity: Option<usize>,
}
