use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::{Backoff, EventBus, HandlerError, MessageHandler, Result};

/// What one poll of a consumer achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollOutcome {
    /// Events handled (or skipped) and committed.
    pub acknowledged: usize,

    /// True if a handler failed transiently and the batch stopped there.
    pub stalled: bool,
}

/// A consumer group reading one topic into one handler.
///
/// Events are handled strictly in offset order. The group's offset is
/// committed after each event, so a crash redelivers at most the event
/// being handled.
#[derive(Clone)]
pub struct Consumer {
    bus: Arc<dyn EventBus>,
    group: String,
    handler: Arc<dyn MessageHandler>,
    batch_size: usize,
    poll_interval: Duration,
    backoff: Backoff,
}

impl Consumer {
    pub fn new(
        bus: Arc<dyn EventBus>,
        group: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            bus,
            group: group.into(),
            handler,
            batch_size: 100,
            poll_interval: Duration::from_millis(100),
            backoff: Backoff::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn topic(&self) -> &str {
        self.handler.topic()
    }

    /// Polls one batch and hands each event to the handler.
    ///
    /// A rejected event is logged and committed. A transient failure stops
    /// the batch without committing, so the event and everything after it
    /// are redelivered on the next poll.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let topic = self.handler.topic();
        let events = self.bus.poll(topic, &self.group, self.batch_size).await?;
        let mut outcome = PollOutcome::default();

        for envelope in events {
            match self.handler.handle_envelope(&envelope).await {
                Ok(()) => {
                    tracing::debug!(
                        topic,
                        group = %self.group,
                        offset = %envelope.offset,
                        key = %envelope.key,
                        "event handled"
                    );
                }
                Err(HandlerError::Rejected(reason)) => {
                    tracing::warn!(
                        topic,
                        group = %self.group,
                        offset = %envelope.offset,
                        event_id = %envelope.event_id,
                        %reason,
                        "skipping event"
                    );
                    metrics::counter!("bus_events_rejected_total", "topic" => topic.to_string())
                        .increment(1);
                }
                Err(HandlerError::Transient(reason)) => {
                    tracing::warn!(
                        topic,
                        group = %self.group,
                        offset = %envelope.offset,
                        %reason,
                        "handler failed, event will be redelivered"
                    );
                    outcome.stalled = true;
                    return Ok(outcome);
                }
            }

            self.bus.commit(topic, &self.group, envelope.offset).await?;
            metrics::counter!(
                "bus_events_handled_total",
                "topic" => topic.to_string(),
                "group" => self.group.clone()
            )
            .increment(1);
            outcome.acknowledged += 1;
        }

        Ok(outcome)
    }

    /// Runs the consumer until `shutdown` turns true or its sender is dropped.
    ///
    /// Bus errors and stalled handlers back off exponentially and retry
    /// indefinitely. A full batch is followed immediately by the next poll.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.backoff.clone();
        tracing::info!(topic = self.topic(), group = %self.group, "consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(outcome) if outcome.stalled => backoff.next_delay(),
                Ok(outcome) => {
                    backoff.reset();
                    if outcome.acknowledged >= self.batch_size {
                        Duration::ZERO
                    } else {
                        self.poll_interval
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        topic = self.topic(),
                        group = %self.group,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "poll failed"
                    );
                    delay
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(topic = self.topic(), group = %self.group, "consumer stopped");
    }
}
