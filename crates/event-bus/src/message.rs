use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{AggregateId, EventEnvelope};

/// A typed event payload bound to one topic.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The topic this message is published to.
    const TOPIC: &'static str;

    /// The ordering key. Events with the same key are delivered in order.
    fn key(&self) -> AggregateId;

    fn event_type(&self) -> &'static str {
        Self::TOPIC
    }
}

/// Why a handler did not acknowledge an event.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler could not complete now. The event stays unacknowledged
    /// and is redelivered.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The event can never be processed. It is logged and acknowledged.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl HandlerError {
    pub fn transient(reason: impl std::fmt::Display) -> Self {
        HandlerError::Transient(reason.to_string())
    }

    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        HandlerError::Rejected(reason.to_string())
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Handles one kind of message.
///
/// Return `Ok` only after the local mutation has committed; the consumer
/// acknowledges the event as soon as this returns. Handlers must tolerate
/// redelivery of an event they already processed.
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    async fn handle(&self, message: M) -> HandlerResult;
}

#[async_trait]
impl<M: Message, H: Handler<M> + ?Sized> Handler<M> for Arc<H> {
    async fn handle(&self, message: M) -> HandlerResult {
        (**self).handle(message).await
    }
}

/// Untyped handler for raw envelopes on one topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The topic this handler consumes.
    fn topic(&self) -> &str;

    async fn handle_envelope(&self, envelope: &EventEnvelope) -> HandlerResult;
}

/// Adapts a typed [`Handler`] to a [`MessageHandler`] by decoding the payload.
///
/// A payload that does not decode as `M` is rejected, not retried.
pub struct Typed<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> Typed<M, H>
where
    M: Message,
    H: Handler<M>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> MessageHandler for Typed<M, H>
where
    M: Message,
    H: Handler<M>,
{
    fn topic(&self) -> &str {
        M::TOPIC
    }

    async fn handle_envelope(&self, envelope: &EventEnvelope) -> HandlerResult {
        let message: M = envelope
            .decode()
            .map_err(|e| HandlerError::rejected(format!("malformed {} payload: {e}", M::TOPIC)))?;
        self.handler.handle(message).await
    }
}
