use std::time::Duration;

use crate::{EventBus, EventEnvelope, OutgoingEvent, Result};

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and doubling up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Starts over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(5))
    }
}

/// Publishes an event, retrying transient failures with backoff until it succeeds.
///
/// The event keeps its id across attempts, so an attempt that reached the
/// bus but reported failure is not stored twice. Non-transient errors are
/// returned immediately.
pub async fn publish_with_retry<B: EventBus + ?Sized>(
    bus: &B,
    event: OutgoingEvent,
    mut backoff: Backoff,
) -> Result<EventEnvelope> {
    loop {
        match bus.publish(event.clone()).await {
            Ok(envelope) => {
                metrics::counter!("bus_events_published_total", "topic" => envelope.topic.clone())
                    .increment(1);
                return Ok(envelope);
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "publish failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
