//! Projection processor for feeding bus events to projections.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{Consumer, EventBus, EventEnvelope, HandlerError, HandlerResult, MessageHandler, Offset};
use futures_util::StreamExt;

use crate::Result;
use crate::projection::Projection;

/// Delivers bus events to projections.
///
/// The processor supports:
/// - Consumers: one consumer group per projection (named after it) per topic
/// - Catch-up: drains every group's backlog once
/// - Rebuild: resets all projections and replays their topics from offset 0
pub struct ProjectionProcessor {
    bus: Arc<dyn EventBus>,
    projections: Vec<Arc<dyn Projection>>,
}

impl ProjectionProcessor {
    /// Creates a new processor reading from the given bus.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            projections: Vec::new(),
        }
    }

    /// Registers a projection with this processor.
    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Builds one consumer per projection and topic.
    pub fn consumers(&self) -> Vec<Consumer> {
        self.projections
            .iter()
            .flat_map(|projection| {
                projection.topics().iter().map(|&topic| {
                    let handler = ProjectionHandler {
                        projection: Arc::clone(projection),
                        topic,
                    };
                    Consumer::new(Arc::clone(&self.bus), projection.name(), Arc::new(handler))
                })
            })
            .collect()
    }

    /// Polls every consumer until its backlog is empty or it stalls.
    ///
    /// Returns the number of events acknowledged.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<usize> {
        let mut acknowledged = 0;
        for consumer in self.consumers() {
            loop {
                let outcome = consumer.poll_once().await?;
                acknowledged += outcome.acknowledged;
                if outcome.acknowledged == 0 || outcome.stalled {
                    break;
                }
            }
        }

        tracing::info!(events_applied = acknowledged, "catch-up complete");

        Ok(acknowledged)
    }

    /// Delivers a single event to every projection subscribed to its topic.
    #[tracing::instrument(skip(self, event), fields(topic = %event.topic))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            if projection.topics().contains(&event.topic.as_str()) {
                projection.handle(event).await?;
            }
        }
        Ok(())
    }

    /// Resets all projections and replays their topics from the beginning.
    ///
    /// Each group's cursor is moved to the last replayed offset so the
    /// consumers pick up where the replay ended.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            projection.reset().await?;

            for &topic in projection.topics() {
                let mut stream = self.bus.replay(topic).await?;
                let mut last = Offset::start();

                while let Some(event) = stream.next().await {
                    let event = event?;
                    match projection.handle(&event).await {
                        Ok(()) => {}
                        Err(e) if e.is_permanent() => {
                            tracing::warn!(
                                projection = projection.name(),
                                topic,
                                offset = %event.offset,
                                error = %e,
                                "skipping event during rebuild"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                    last = event.offset;
                }

                if last > Offset::start() {
                    self.bus.commit(topic, projection.name(), last).await?;
                }
            }

            tracing::info!(projection = projection.name(), "projection rebuilt");
        }
        Ok(())
    }
}

/// Feeds one topic into one projection.
struct ProjectionHandler {
    projection: Arc<dyn Projection>,
    topic: &'static str,
}

#[async_trait]
impl MessageHandler for ProjectionHandler {
    fn topic(&self) -> &str {
        self.topic
    }

    async fn handle_envelope(&self, envelope: &EventEnvelope) -> HandlerResult {
        match self.projection.handle(envelope).await {
            Ok(()) => {
                metrics::counter!(
                    "projections_events_applied",
                    "projection" => self.projection.name()
                )
                .increment(1);
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(HandlerError::rejected(e)),
            Err(e) => Err(HandlerError::transient(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectionError;
    use crate::projection::ProjectionPosition;
    use event_bus::{InMemoryEventBus, OutgoingEvent};
    use tokio::sync::RwLock;

    /// Counts events and fails on payloads marked `bad`.
    struct CountingProjection {
        count: Arc<RwLock<u64>>,
        position: Arc<RwLock<ProjectionPosition>>,
    }

    impl CountingProjection {
        fn new() -> Self {
            Self {
                count: Arc::new(RwLock::new(0)),
                position: Arc::new(RwLock::new(ProjectionPosition::default())),
            }
        }
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn topics(&self) -> &'static [&'static str] {
            &["test.a", "test.b"]
        }

        async fn handle(&self, event: &EventEnvelope) -> Result<()> {
            if event.payload.get("bad").is_some() {
                let err = serde_json::from_str::<u32>("bad").unwrap_err();
                return Err(ProjectionError::Deserialization(err));
            }
            *self.count.write().await += 1;
            let mut pos = self.position.write().await;
            *pos = pos.record(event);
            Ok(())
        }

        async fn position(&self) -> ProjectionPosition {
            *self.position.read().await
        }

        async fn reset(&self) -> Result<()> {
            *self.count.write().await = 0;
            *self.position.write().await = ProjectionPosition::default();
            Ok(())
        }
    }

    async fn publish(bus: &InMemoryEventBus, topic: &str, payload: serde_json::Value) {
        bus.publish(OutgoingEvent::builder(topic, "k").payload_raw(payload).build())
            .await
            .unwrap();
    }

    fn processor_with(bus: Arc<InMemoryEventBus>) -> (ProjectionProcessor, Arc<RwLock<u64>>) {
        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let mut processor = ProjectionProcessor::new(bus);
        processor.register(Arc::new(projection));
        (processor, count)
    }

    #[tokio::test]
    async fn catch_up_drains_every_topic() {
        let bus = Arc::new(InMemoryEventBus::new());
        publish(&bus, "test.a", serde_json::json!({})).await;
        publish(&bus, "test.a", serde_json::json!({})).await;
        publish(&bus, "test.b", serde_json::json!({})).await;
        publish(&bus, "test.other", serde_json::json!({})).await;

        let (processor, count) = processor_with(bus.clone());
        assert_eq!(processor.consumers().len(), 2);
        assert_eq!(processor.run_catch_up().await.unwrap(), 3);
        assert_eq!(*count.read().await, 3);

        // Cursors are committed under the projection's name.
        assert_eq!(bus.committed_offset("test.a", "counting").await.unwrap(), Offset::new(2));

        // A second catch-up has nothing left to do.
        assert_eq!(processor.run_catch_up().await.unwrap(), 0);
        assert_eq!(*count.read().await, 3);
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let bus = Arc::new(InMemoryEventBus::new());
        publish(&bus, "test.a", serde_json::json!({"bad": true})).await;
        publish(&bus, "test.a", serde_json::json!({})).await;

        let (processor, count) = processor_with(bus);
        assert_eq!(processor.run_catch_up().await.unwrap(), 2);
        assert_eq!(*count.read().await, 1);
    }

    #[tokio::test]
    async fn process_event_filters_by_topic() {
        let bus = Arc::new(InMemoryEventBus::new());
        let (processor, count) = processor_with(bus);

        let wanted = EventEnvelope::from_outgoing(
            OutgoingEvent::builder("test.b", "k").payload_raw(serde_json::json!({})).build(),
            Offset::new(1),
        );
        let ignored = EventEnvelope::from_outgoing(
            OutgoingEvent::builder("test.z", "k").payload_raw(serde_json::json!({})).build(),
            Offset::new(1),
        );
        processor.process_event(&wanted).await.unwrap();
        processor.process_event(&ignored).await.unwrap();

        assert_eq!(*count.read().await, 1);
    }

    #[tokio::test]
    async fn rebuild_resets_and_replays() {
        let bus = Arc::new(InMemoryEventBus::new());
        publish(&bus, "test.a", serde_json::json!({})).await;
        publish(&bus, "test.b", serde_json::json!({})).await;

        let (processor, count) = processor_with(bus.clone());
        processor.run_catch_up().await.unwrap();
        assert_eq!(*count.read().await, 2);

        processor.rebuild_all().await.unwrap();
        assert_eq!(*count.read().await, 2);

        // The replay moved the cursors, so consumers do not see the events again.
        assert_eq!(processor.run_catch_up().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rebuild_of_empty_topics_leaves_cursors_alone() {
        let bus = Arc::new(InMemoryEventBus::new());
        let (processor, count) = processor_with(bus.clone());

        processor.rebuild_all().await.unwrap();
        assert_eq!(*count.read().await, 0);
        assert_eq!(bus.committed_offset("test.a", "counting").await.unwrap(), Offset::start());
    }
}
