use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    BusError, EventEnvelope, EventId, Offset, OutgoingEvent, Result,
    bus::{EventBus, EventStream},
};

#[derive(Default)]
struct Topics {
    logs: HashMap<String, Vec<EventEnvelope>>,
    cursors: HashMap<(String, String), Offset>,
    published_ids: HashMap<EventId, Offset>,
}

/// In-memory bus for tests and single-process deployments.
///
/// Supports fault injection: the next N publishes or polls can be made to
/// fail with [`BusError::Transient`].
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    topics: Arc<RwLock<Topics>>,
    failing_publishes: Arc<AtomicU32>,
    failing_polls: Arc<AtomicU32>,
}

impl InMemoryEventBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail transiently.
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` polls fail transiently.
    pub fn fail_next_polls(&self, count: u32) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    /// Returns every event published to the topic.
    pub async fn published(&self, topic: &str) -> Vec<EventEnvelope> {
        self.topics
            .read()
            .await
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Re-publishes a stored event under a new offset, as a redelivering broker would.
    pub async fn redeliver(&self, envelope: &EventEnvelope) -> EventEnvelope {
        let mut topics = self.topics.write().await;
        let log = topics.logs.entry(envelope.topic.clone()).or_default();
        let offset = Offset::new(log.len() as i64 + 1);
        let copy = EventEnvelope {
            offset,
            ..envelope.clone()
        };
        log.push(copy.clone());
        copy
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: OutgoingEvent) -> Result<EventEnvelope> {
        if Self::take_fault(&self.failing_publishes) {
            return Err(BusError::Transient("injected publish failure".into()));
        }

        let mut topics = self.topics.write().await;
        let Topics {
            logs,
            published_ids,
            ..
        } = &mut *topics;
        let log = logs.entry(event.topic.clone()).or_default();

        if let Some(offset) = published_ids.get(&event.event_id)
            && let Some(existing) = log.get((offset.as_i64() - 1) as usize)
        {
            return Ok(existing.clone());
        }

        let offset = Offset::new(log.len() as i64 + 1);
        published_ids.insert(event.event_id, offset);
        let envelope = EventEnvelope::from_outgoing(event, offset);
        log.push(envelope.clone());

        Ok(envelope)
    }

    async fn poll(&self, topic: &str, group: &str, max: usize) -> Result<Vec<EventEnvelope>> {
        if Self::take_fault(&self.failing_polls) {
            return Err(BusError::Transient("injected poll failure".into()));
        }

        let topics = self.topics.read().await;
        let committed = topics
            .cursors
            .get(&(topic.to_string(), group.to_string()))
            .copied()
            .unwrap_or_default();

        let events = topics
            .logs
            .get(topic)
            .map(|log| {
                log.iter()
                    .filter(|e| e.offset > committed)
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(events)
    }

    async fn commit(&self, topic: &str, group: &str, offset: Offset) -> Result<()> {
        let mut topics = self.topics.write().await;
        let cursor = topics
            .cursors
            .entry((topic.to_string(), group.to_string()))
            .or_default();
        *cursor = (*cursor).max(offset);
        Ok(())
    }

    async fn committed_offset(&self, topic: &str, group: &str) -> Result<Offset> {
        let topics = self.topics.read().await;
        Ok(topics
            .cursors
            .get(&(topic.to_string(), group.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn replay(&self, topic: &str) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.published(topic).await;
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}
