use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{EventEnvelope, Message, Offset, OutgoingEvent, Result};

/// A stream of events, in offset order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for bus implementations.
///
/// All implementations must be thread-safe. Offsets are assigned per topic
/// and strictly increase in publish order.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends an event to its topic and returns it with its offset.
    ///
    /// Publishing an event id that is already stored returns the stored
    /// envelope without appending again.
    async fn publish(&self, event: OutgoingEvent) -> Result<EventEnvelope>;

    /// Returns up to `max` events after the group's committed offset.
    ///
    /// Polling does not move the cursor; the same events come back until
    /// they are committed.
    async fn poll(&self, topic: &str, group: &str, max: usize) -> Result<Vec<EventEnvelope>>;

    /// Acknowledges every event of the topic up to and including `offset`.
    ///
    /// A commit behind the current cursor is ignored.
    async fn commit(&self, topic: &str, group: &str, offset: Offset) -> Result<()>;

    /// Returns the group's committed offset, [`Offset::start`] if none.
    async fn committed_offset(&self, topic: &str, group: &str) -> Result<Offset>;

    /// Streams every event of the topic from the beginning.
    async fn replay(&self, topic: &str) -> Result<EventStream>;
}

/// Extension trait providing typed publishing.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serializes and publishes a typed message on its topic.
    async fn publish_message<M: Message>(&self, message: &M) -> Result<EventEnvelope> {
        let event = OutgoingEvent::from_message(message)?;
        self.publish(event).await
    }
}

impl<T: EventBus + ?Sized> EventBusExt for T {}
