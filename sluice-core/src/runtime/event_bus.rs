use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::{PollEvent, PollEventPublisher};

/// In-process event bus that fans poll notifications out to observers inside
/// the runtime. Slow subscribers lag and lose events rather than blocking
/// pollers.
pub struct InProcPollEventBus {
    sender: broadcast::Sender<PollEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcPollEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcPollEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcPollEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl PollEventPublisher for InProcPollEventBus {
    async fn publish(&self, event: PollEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

pub trait PollEventStream {
    fn subscribe_events(&self) -> broadcast::Receiver<PollEvent>;
}

impl PollEventStream for InProcPollEventBus {
    fn subscribe_events(&self) -> broadcast::Receiver<PollEvent> {
        self.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::backlog::WorkerId;
    use crate::events::{EventMeta, PollEventPayload};

    #[tokio::test]
    async fn subscribers_receive_published_events() -> Result<()> {
        let bus = InProcPollEventBus::new(8);
        let mut rx = bus.subscribe_events();
        let meta = EventMeta::new("inbox", Uuid::now_v7(), WorkerId::new());
        bus.publish(PollEvent::new(meta, PollEventPayload::Reserved { count: 3 }))
            .await?;

        let event = rx.recv().await.expect("event");
        assert_eq!(event.meta.poller, "inbox");
        assert!(matches!(event.payload, PollEventPayload::Reserved { count: 3 }));
        Ok(())
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() -> Result<()> {
        let bus = InProcPollEventBus::new(1);
        let meta = EventMeta::new("inbox", Uuid::now_v7(), WorkerId::new());
        bus.publish(PollEvent::new(meta, PollEventPayload::TickStarted))
            .await
    }
}
