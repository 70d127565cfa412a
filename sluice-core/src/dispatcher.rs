//! Per-item delivery of a reserved batch to registered handlers.

use std::any::type_name_of_val;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::backlog::BatchLimit;
use crate::error::{Result, SluiceError};
use crate::item::BacklogItem;
use crate::source::{ByteStream, ItemFetcher};

/// What the dispatcher hands to a handler: the item, plus a way to stream its
/// content when a fetcher is configured.
///
/// Content is never read up front. A handler that needs the bytes calls
/// [`Delivery::open`]; one that only looks at the item pays nothing.
pub struct Delivery<T> {
    pub item: T,
    fetcher: Option<Arc<dyn ItemFetcher<T>>>,
}

impl<T: Clone> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self {
            item: self.item.clone(),
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("item", &self.item)
            .field("has_content", &self.has_content())
            .finish()
    }
}

impl<T> Delivery<T> {
    pub fn new(item: T) -> Self {
        Self { item, fetcher: None }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ItemFetcher<T>>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn has_content(&self) -> bool {
        self.fetcher.is_some()
    }
}

impl<T: fmt::Debug + Send + Sync> Delivery<T> {
    /// Opens a fresh stream over the item's content, or `None` without a
    /// fetcher. Every error comes back as [`SluiceError::FetchFailed`].
    pub async fn open(&self) -> Result<Option<ByteStream>> {
        let Some(fetcher) = &self.fetcher else {
            return Ok(None);
        };
        match fetcher.fetch(&self.item).await {
            Ok(stream) => Ok(Some(stream)),
            Err(err @ SluiceError::FetchFailed { .. }) => Err(err),
            Err(err) => Err(SluiceError::fetch(&self.item, err)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandlerOutcome {
    /// The handler took the item; no further handler sees it.
    Consumed,
    /// Not for this handler; the next one is tried.
    NotApplicable,
}

#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn try_handle(&self, delivery: &Delivery<T>) -> Result<HandlerOutcome>;
}

/// Outcome for a single item.
#[derive(Debug)]
pub enum ItemOutcome {
    Delivered,
    Failed(SluiceError),
}

/// Result of dispatching one batch.
#[derive(Debug)]
pub struct DispatchReport<T> {
    pub delivered: Vec<T>,
    pub failed: Vec<(T, SluiceError)>,
    /// Items beyond the per-task limit; never offered to a handler.
    pub undelivered: Vec<T>,
}

impl<T> Default for DispatchReport<T> {
    fn default() -> Self {
        Self {
            delivered: Vec::new(),
            failed: Vec::new(),
            undelivered: Vec::new(),
        }
    }
}

impl<T> DispatchReport<T> {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty() && self.undelivered.is_empty()
    }
}

/// Delivers items to handlers in registration order until one consumes it.
///
/// Any handler error or panic, including one raised while streaming content,
/// fails that item only. So does an item no handler accepts. The rest of the
/// batch is still delivered.
pub struct Dispatcher<T> {
    handlers: Vec<Arc<dyn Handler<T>>>,
    fetcher: Option<Arc<dyn ItemFetcher<T>>>,
    max_items_per_task: BatchLimit,
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handler_types: Vec<&str> = self
            .handlers
            .iter()
            .map(|handler| type_name_of_val(handler.as_ref()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &handler_types)
            .field("fetcher", &self.fetcher.is_some())
            .field("max_items_per_task", &self.max_items_per_task)
            .finish()
    }
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new(BatchLimit::Unbounded)
    }
}

impl<T> Dispatcher<T> {
    pub fn new(max_items_per_task: impl Into<BatchLimit>) -> Self {
        Self {
            handlers: Vec::new(),
            fetcher: None,
            max_items_per_task: max_items_per_task.into(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler<T>>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ItemFetcher<T>>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn task_limit(&self) -> BatchLimit {
        self.max_items_per_task
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Splits a batch into the part that will be offered to handlers and the
    /// part held back by the per-task limit.
    pub fn split_batch<'a>(&self, batch: &'a [T]) -> (&'a [T], &'a [T]) {
        match self.max_items_per_task.max() {
            Some(cap) if cap < batch.len() => batch.split_at(cap),
            _ => (batch, &[]),
        }
    }
}

impl<T: BacklogItem> Dispatcher<T> {
    pub async fn dispatch(&self, batch: &[T]) -> DispatchReport<T> {
        let (deliverable, held_back) = self.split_batch(batch);
        let mut report = DispatchReport {
            undelivered: held_back.to_vec(),
            ..DispatchReport::default()
        };

        for item in deliverable {
            match self.dispatch_one(item).await {
                ItemOutcome::Delivered => report.delivered.push(item.clone()),
                ItemOutcome::Failed(err) => report.failed.push((item.clone(), err)),
            }
        }

        debug!(
            target: "sluice::dispatch",
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            undelivered = report.undelivered.len(),
            "batch dispatched"
        );
        report
    }

    /// Offer one item to the handlers.
    pub async fn dispatch_one(&self, item: &T) -> ItemOutcome {
        let delivery = Delivery {
            item: item.clone(),
            fetcher: self.fetcher.clone(),
        };

        for handler in &self.handlers {
            let attempt = AssertUnwindSafe(handler.try_handle(&delivery))
                .catch_unwind()
                .await;
            match attempt {
                Ok(Ok(HandlerOutcome::Consumed)) => {
                    debug!(
                        target: "sluice::dispatch",
                        item = ?item,
                        handler = type_name_of_val(handler.as_ref()),
                        "item consumed"
                    );
                    return ItemOutcome::Delivered;
                }
                Ok(Ok(HandlerOutcome::NotApplicable)) => continue,
                Ok(Err(err)) => {
                    warn!(target: "sluice::dispatch", item = ?item, error = %err, "handler failed");
                    return ItemOutcome::Failed(match err {
                        SluiceError::ProcessingFailed { .. } | SluiceError::FetchFailed { .. } => err,
                        other => SluiceError::processing(item, other),
                    });
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!(target: "sluice::dispatch", item = ?item, panic = %reason, "handler panicked");
                    return ItemOutcome::Failed(SluiceError::processing(
                        item,
                        format!("handler panicked: {reason}"),
                    ));
                }
            }
        }

        ItemOutcome::Failed(SluiceError::processing(item, "no handler accepted the item"))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures::{StreamExt, stream};

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Handler<String> for Recording {
        async fn try_handle(&self, delivery: &Delivery<String>) -> Result<HandlerOutcome> {
            self.seen.lock().expect("seen").push(delivery.item.clone());
            Ok(HandlerOutcome::Consumed)
        }
    }

    struct OnlyCsv;

    #[async_trait]
    impl Handler<String> for OnlyCsv {
        async fn try_handle(&self, delivery: &Delivery<String>) -> Result<HandlerOutcome> {
            if delivery.item.ends_with(".csv") {
                Ok(HandlerOutcome::Consumed)
            } else {
                Ok(HandlerOutcome::NotApplicable)
            }
        }
    }

    struct Explosive;

    #[async_trait]
    impl Handler<String> for Explosive {
        async fn try_handle(&self, delivery: &Delivery<String>) -> Result<HandlerOutcome> {
            match delivery.item.as_str() {
                "panic" => panic!("boom"),
                "error" => Err(SluiceError::Internal("disk full".into())),
                _ => Ok(HandlerOutcome::Consumed),
            }
        }
    }

    fn batch(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn first_applicable_handler_wins() {
        let fallback = Arc::new(Recording::default());
        let dispatcher = Dispatcher::<String>::new(BatchLimit::Unbounded)
            .with_handler(Arc::new(OnlyCsv))
            .with_handler(fallback.clone());

        let report = dispatcher.dispatch(&batch(&["a.csv", "b.txt"])).await;
        assert!(report.all_delivered());
        assert_eq!(*fallback.seen.lock().unwrap(), ["b.txt"]);
    }

    #[tokio::test]
    async fn failures_stay_with_their_item() {
        let dispatcher = Dispatcher::<String>::new(0).with_handler(Arc::new(Explosive));

        let report = dispatcher
            .dispatch(&batch(&["ok-1", "panic", "error", "ok-2"]))
            .await;
        assert_eq!(report.delivered, ["ok-1", "ok-2"]);
        let failed: Vec<_> = report.failed.iter().map(|(item, _)| item.as_str()).collect();
        assert_eq!(failed, ["panic", "error"]);
        assert!(report.failed[0].1.to_string().contains("handler panicked: boom"));
        assert!(matches!(report.failed[1].1, SluiceError::ProcessingFailed { .. }));
    }

    #[tokio::test]
    async fn unclaimed_item_is_a_failure() {
        let dispatcher = Dispatcher::<String>::new(0).with_handler(Arc::new(OnlyCsv));
        let report = dispatcher.dispatch(&batch(&["notes.md"])).await;
        assert_eq!(report.failed.len(), 1);
        assert!(report.delivered.is_empty());
    }

    #[tokio::test]
    async fn task_limit_holds_back_the_tail() {
        let dispatcher = Dispatcher::<String>::new(2usize).with_handler(Arc::new(Recording::default()));
        let report = dispatcher.dispatch(&batch(&["a", "b", "c"])).await;
        assert_eq!(report.delivered, ["a", "b"]);
        assert_eq!(report.undelivered, ["c"]);
        assert!(!report.all_delivered());
    }

    /// Reads the whole content stream and records what it saw.
    #[derive(Default)]
    struct Reading {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Handler<String> for Reading {
        async fn try_handle(&self, delivery: &Delivery<String>) -> Result<HandlerOutcome> {
            let Some(mut content) = delivery.open().await? else {
                return Ok(HandlerOutcome::NotApplicable);
            };
            let mut body = Vec::new();
            while let Some(chunk) = content.next().await {
                body.extend_from_slice(&chunk.map_err(|err| SluiceError::fetch(&delivery.item, err))?);
            }
            self.seen.lock().expect("seen").push(body);
            Ok(HandlerOutcome::Consumed)
        }
    }

    struct Failing;

    #[async_trait]
    impl ItemFetcher<String> for Failing {
        async fn fetch(&self, item: &String) -> Result<ByteStream> {
            Err(SluiceError::SourceUnavailable(format!("{item} is gone")))
        }
    }

    struct Chunked;

    #[async_trait]
    impl ItemFetcher<String> for Chunked {
        async fn fetch(&self, item: &String) -> Result<ByteStream> {
            let chunks: Vec<std::io::Result<Bytes>> = item
                .split('-')
                .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
                .collect();
            Ok(stream::iter(chunks).boxed())
        }
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_item() {
        let handler = Arc::new(Reading::default());
        let dispatcher = Dispatcher::<String>::new(0)
            .with_handler(handler.clone())
            .with_fetcher(Arc::new(Failing));

        let report = dispatcher.dispatch(&batch(&["a"])).await;
        assert!(matches!(report.failed[0].1, SluiceError::FetchFailed { .. }));
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn content_is_only_read_by_handlers_that_open_it() {
        let names = Arc::new(Recording::default());
        let dispatcher = Dispatcher::<String>::new(0)
            .with_handler(names.clone())
            .with_fetcher(Arc::new(Failing));

        // The fetcher would fail, but nothing asks it for content.
        let report = dispatcher.dispatch(&batch(&["a"])).await;
        assert!(report.all_delivered());
        assert_eq!(*names.seen.lock().unwrap(), ["a"]);
    }

    #[tokio::test]
    async fn content_arrives_in_chunks() {
        let handler = Arc::new(Reading::default());
        let dispatcher = Dispatcher::<String>::new(0)
            .with_handler(handler.clone())
            .with_fetcher(Arc::new(Chunked));

        let report = dispatcher.dispatch(&batch(&["ab-cd-e"])).await;
        assert!(report.all_delivered());
        assert_eq!(*handler.seen.lock().unwrap(), [b"abcde".to_vec()]);
    }

    #[tokio::test]
    async fn delivery_without_fetcher_has_no_content() {
        let delivery = Delivery::new("a".to_string());
        assert!(!delivery.has_content());
        assert!(delivery.open().await.unwrap().is_none());
    }
}
