//! Core projection trait and position tracking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::EventEnvelope;

use crate::Result;

/// How far a replica has caught up with the bus.
///
/// `last_event_at` is the publish time of the newest event applied, so
/// `now - last_event_at` bounds how stale the replica can be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub events_applied: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ProjectionPosition {
    /// Records one more applied event. Redelivered older events never move
    /// `last_event_at` backwards.
    pub fn record(&self, event: &EventEnvelope) -> Self {
        Self {
            events_applied: self.events_applied + 1,
            last_event_at: self.last_event_at.max(Some(event.timestamp)),
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_event_at {
            Some(at) => write!(f, "{} events, latest at {}", self.events_applied, at.to_rfc3339()),
            None => write!(f, "empty"),
        }
    }
}

/// A projection that keeps a replica current from bus events.
///
/// `handle` must be idempotent: the bus delivers at least once, and a
/// rebuild replays events the replica has already seen.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection, also its consumer group.
    fn name(&self) -> &'static str;

    /// Returns the topics this projection consumes.
    fn topics(&self) -> &'static [&'static str];

    /// Handles a single event, updating the replica.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    /// Returns the current position of this projection.
    async fn position(&self) -> ProjectionPosition;

    /// Resets the projection to its initial state.
    async fn reset(&self) -> Result<()>;
}
