use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;
use sluice_config::SluiceConfig;
use sluice_core::events::{NoopEventPublisher, PollEvent, PollEventPayload, PollEventPublisher};
use sluice_core::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Builds the local-directory mirror described by `config`.
pub fn build_driver(
    config: &SluiceConfig,
    events: Arc<dyn PollEventPublisher>,
) -> anyhow::Result<PollDriver<RemoteFile>> {
    let source = Arc::new(LocalDirectorySource::new(&config.source.directory));

    let mut filter = CompositeFilter::<RemoteFile>::new();
    if config.source.ignore_hidden {
        filter = filter.with(match &config.source.incomplete_suffixes {
            Some(suffixes) => IgnoreHidden::with_suffixes(suffixes.iter().cloned()),
            None => IgnoreHidden::default(),
        });
    }
    if let Some(pattern) = &config.source.pattern {
        filter = filter.with(PatternFilter::new(pattern)?);
    }

    let dispatcher = Dispatcher::<RemoteFile>::new(config.poller.task_limit())
        .with_fetcher(source.clone())
        .with_handler(Arc::new(DirectoryMirrorHandler::new(&config.sink.destination)));

    let driver = PollDriver::<RemoteFile>::builder(config.source.directory.display().to_string())
        .source(source)
        .filter(Arc::new(filter))
        .dispatcher(dispatcher)
        .backlog(Backlog::from_config(&config.poller.backlog))
        .events(events)
        .settings(TickSettings::from(&config.poller))
        .build()?;
    Ok(driver)
}

/// Runs until interrupted, or until every worker stops on its own.
pub async fn watch(config: SluiceConfig) -> anyhow::Result<()> {
    let runtime = Arc::new(PollerRuntime::from_config(&config.poller));
    let driver = Arc::new(build_driver(&config, runtime.events())?);
    spawn_event_logger(&runtime);

    let trigger: Arc<dyn TriggerPolicy> = (&config.poller.trigger).into();
    runtime
        .spawn(Arc::clone(&driver), trigger, config.poller.concurrency)
        .await?;
    info!(
        source = %config.source.directory.display(),
        destination = %config.sink.destination.display(),
        workers = config.poller.concurrency,
        "watching"
    );

    let interrupted = Arc::clone(&runtime);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight ticks");
            if let Err(err) = interrupted.shutdown().await {
                warn!(error = %err, "shutdown reported an error");
            }
        }
    });

    runtime.wait().await.context("poller stopped on a fatal error")?;
    let stats = driver.backlog().stats()?;
    info!(pending = stats.pending, done = stats.done, "stopped");
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct OnceSummary {
    pub ticks: Vec<TickReport>,
    pub backlog: BacklogStats,
}

/// One tick, or with `drain` as many as it takes until a tick makes no
/// progress.
pub async fn once(config: SluiceConfig, drain: bool) -> anyhow::Result<OnceSummary> {
    let driver = build_driver(&config, Arc::new(NoopEventPublisher))?;

    let mut ticks = Vec::new();
    loop {
        let report = driver.tick().await?;
        let outcome = report.outcome;
        let progressed = report.processed > 0;
        ticks.push(report);

        if outcome == TickOutcome::SourceUnavailable {
            bail!(
                "source directory {} is unavailable",
                config.source.directory.display()
            );
        }
        if !drain || !progressed {
            break;
        }
    }

    Ok(OnceSummary {
        ticks,
        backlog: driver.backlog().stats()?,
    })
}

fn spawn_event_logger(runtime: &PollerRuntime) {
    let mut events = runtime.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &PollEvent) {
    match &event.payload {
        PollEventPayload::ItemProcessed { item } => info!(item = %item, "processed"),
        PollEventPayload::ItemFailed { item, error } => {
            warn!(item = %item, error = %error, "failed, will retry")
        }
        PollEventPayload::SnapshotFailed { error } => warn!(error = %error, "source unavailable"),
        other => debug!(worker = %event.meta.worker, payload = ?other, "poll event"),
    }
}
