//! Trigger-driven execution of poll drivers.

mod event_bus;
mod supervisor;

pub use event_bus::{InProcPollEventBus, PollEventStream};
pub use supervisor::{PollerRuntime, PollerRuntimeBuilder};

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backlog::BacklogWorker;
use crate::error::{Result, SluiceError};
use crate::item::BacklogItem;
use crate::poll::{PollDriver, TriggerContext, TriggerPolicy};

/// Runs ticks of `driver` whenever `trigger` says so, with one long-lived
/// worker context, until the trigger ends the schedule or `shutdown` fires.
///
/// A tick already in progress when `shutdown` fires is allowed to finish.
/// A fatal tick error ends the loop and is returned.
pub async fn run_schedule<T: BacklogItem>(
    driver: Arc<PollDriver<T>>,
    trigger: Arc<dyn TriggerPolicy>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut worker = driver.backlog().worker();
    let result = schedule_loop(&driver, trigger.as_ref(), &shutdown, &mut worker).await;

    match &result {
        Ok(()) => {
            info!(target: "sluice::poll", poller = %driver.name(), worker = %worker.id(), "worker stopped");
            driver.emit_stopped(worker.id(), None).await;
        }
        Err(err) => {
            error!(target: "sluice::poll", poller = %driver.name(), worker = %worker.id(), error = %err, "worker stopped on fatal error");
            driver.emit_stopped(worker.id(), Some(err.to_string())).await;
        }
    }
    result
}

async fn schedule_loop<T: BacklogItem>(
    driver: &PollDriver<T>,
    trigger: &dyn TriggerPolicy,
    shutdown: &CancellationToken,
    worker: &mut BacklogWorker<T>,
) -> Result<()> {
    let mut ctx = TriggerContext::default();
    while let Some(next) = trigger.next_execution(&ctx, Instant::now()) {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(next) => {}
        }

        let started = Instant::now();
        let result = driver.tick_with(worker).await;
        ctx.record_run(next, started, Instant::now());
        result?;
    }
    Ok(())
}

/// Handle to a single scheduled driver.
pub struct ScheduleHandle {
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("cancelled", &self.token.is_cancelled())
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl ScheduleHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the schedule to end on its own (one-shot triggers) or after
    /// [`ScheduleHandle::cancel`].
    pub async fn join(self) -> Result<()> {
        self.handle
            .await
            .map_err(|err| SluiceError::Internal(format!("poll task failed: {err}")))?
    }

    pub async fn stop(self) -> Result<()> {
        self.cancel();
        self.join().await
    }
}

/// Spawns [`run_schedule`] for one driver on the current runtime.
pub fn schedule<T: BacklogItem>(
    driver: Arc<PollDriver<T>>,
    trigger: Arc<dyn TriggerPolicy>,
) -> ScheduleHandle {
    let token = CancellationToken::new();
    let handle = tokio::spawn(run_schedule(driver, trigger, token.clone()));
    ScheduleHandle { token, handle }
}
