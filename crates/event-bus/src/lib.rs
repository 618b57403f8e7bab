//! Event bus adapter.
//!
//! Services publish domain events to named topics and consume them through
//! durable consumer groups. Delivery is at-least-once: a consumer group's
//! cursor only moves past an event after its handler has acknowledged it, so
//! a crash or a transient failure leads to redelivery, never to loss.
//!
//! Offsets are assigned per topic in publish order, so events sharing a key
//! are seen by every group in the order they were published.

pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod retry;

pub use bus::{EventBus, EventBusExt, EventStream};
pub use common::AggregateId;
pub use consumer::{Consumer, PollOutcome};
pub use envelope::{EventEnvelope, EventId, Offset, OutgoingEvent, OutgoingEventBuilder};
pub use error::{BusError, Result};
pub use memory::InMemoryEventBus;
pub use message::{Handler, HandlerError, HandlerResult, Message, MessageHandler, Typed};
pub use postgres::PostgresEventBus;
pub use retry::{Backoff, publish_with_retry};
