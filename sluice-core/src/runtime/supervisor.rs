use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{InProcPollEventBus, run_schedule};
use crate::config::PollerConfig;
use crate::error::{Result, SluiceError};
use crate::item::BacklogItem;
use crate::poll::{PollDriver, TriggerPolicy};

struct WorkerTask {
    poller: String,
    index: usize,
    handle: JoinHandle<Result<()>>,
}

/// Supervises the worker tasks of every scheduled poller inside a single
/// process.
///
/// Each poller gets `concurrency` tasks, each owning its own backlog worker
/// context. All tasks of one poller share a child cancellation token: a
/// fatal error in one of them stops its siblings without touching other
/// pollers.
pub struct PollerRuntime {
    events: Arc<InProcPollEventBus>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    worker_handles: Mutex<Vec<WorkerTask>>,
}

impl fmt::Debug for PollerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_handle_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("PollerRuntime")
            .field("events", &self.events)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("worker_handle_count", &worker_handle_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl PollerRuntime {
    pub fn builder() -> PollerRuntimeBuilder {
        PollerRuntimeBuilder::default()
    }

    pub fn from_config(config: &PollerConfig) -> Self {
        Self::builder()
            .shutdown_timeout(config.shutdown_timeout())
            .event_capacity(config.event_channel_capacity)
            .build()
    }

    /// Bus every driver built for this runtime should publish to.
    pub fn events(&self) -> Arc<InProcPollEventBus> {
        Arc::clone(&self.events)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn `concurrency` workers ticking `driver` per `trigger`.
    pub async fn spawn<T: BacklogItem>(
        &self,
        driver: Arc<PollDriver<T>>,
        trigger: Arc<dyn TriggerPolicy>,
        concurrency: usize,
    ) -> Result<()> {
        if concurrency == 0 {
            return Err(SluiceError::InvalidConfig(format!(
                "poller {} needs at least one worker",
                driver.name()
            )));
        }
        if self.shutdown_token.is_cancelled() {
            return Err(SluiceError::Cancelled("runtime is shutting down".into()));
        }

        let poller = driver.name().to_string();
        let poller_token = self.shutdown_token.child_token();
        let mut handles = self.worker_handles.lock().await;
        for index in 0..concurrency {
            let driver = Arc::clone(&driver);
            let trigger = Arc::clone(&trigger);
            let token = poller_token.clone();
            let handle = tokio::spawn(async move {
                let result = run_schedule(driver, trigger, token.clone()).await;
                if result.is_err() {
                    token.cancel();
                }
                result
            });
            handles.push(WorkerTask {
                poller: poller.clone(),
                index,
                handle,
            });
        }

        info!(target: "sluice::poll", poller = %poller, concurrency, "poller workers started");
        Ok(())
    }

    /// Waits until every worker has ended, either on its own (for example
    /// when all triggers are one-shot) or because the runtime was shut down.
    /// Returns the first fatal error.
    ///
    /// Once the shutdown token is cancelled, each remaining worker gets the
    /// shutdown timeout to finish its tick before it is aborted.
    pub async fn wait(&self) -> Result<()> {
        let tasks = self.take_tasks().await;

        let mut first_error = None;
        for task in tasks {
            if let Err(err) = self.join(task).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Signals every worker to stop and waits for each one up to the
    /// shutdown timeout. Workers still running after that are aborted, which
    /// returns their reservations to `pending`.
    ///
    /// Safe to call while another task is in [`wait`](Self::wait); that call
    /// then does the joining and this one only signals.
    pub async fn shutdown(&self) -> Result<()> {
        info!(target: "sluice::poll", "initiating graceful shutdown of poller runtime");
        self.shutdown_token.cancel();

        let result = self.wait().await;
        info!(target: "sluice::poll", "poller runtime shutdown complete");
        result
    }

    async fn take_tasks(&self) -> Vec<WorkerTask> {
        let mut guard = self.worker_handles.lock().await;
        std::mem::take(&mut *guard)
    }

    async fn join(&self, mut task: WorkerTask) -> Result<()> {
        let finished = tokio::select! {
            biased;
            joined = &mut task.handle => Some(joined),
            _ = self.shutdown_token.cancelled() => None,
        };

        let joined = match finished {
            Some(joined) => joined,
            None => match tokio::time::timeout(self.shutdown_timeout, &mut task.handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(target: "sluice::poll", poller = %task.poller, worker = task.index, "worker timed out during shutdown, aborting");
                    task.handle.abort();
                    // The aborted tick is dropped before this resolves, so its
                    // reservation is already back in pending.
                    (&mut task.handle).await
                }
            },
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(target: "sluice::poll", poller = %task.poller, worker = task.index, error = %err, "worker ended with error");
                Err(err)
            }
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => {
                warn!(target: "sluice::poll", poller = %task.poller, worker = task.index, error = %err, "worker task failed");
                Err(SluiceError::Internal(format!("poll task failed: {err}")))
            }
        }
    }
}

/// Builder for [`PollerRuntime`].
#[derive(Debug, Clone)]
pub struct PollerRuntimeBuilder {
    shutdown_timeout: Duration,
    event_capacity: usize,
}

impl Default for PollerRuntimeBuilder {
    fn default() -> Self {
        let defaults = PollerConfig::default();
        Self {
            shutdown_timeout: defaults.shutdown_timeout(),
            event_capacity: defaults.event_channel_capacity,
        }
    }
}

impl PollerRuntimeBuilder {
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> PollerRuntime {
        PollerRuntime {
            events: Arc::new(InProcPollEventBus::new(self.event_capacity)),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout: self.shutdown_timeout,
            worker_handles: Mutex::new(Vec::new()),
        }
    }
}
