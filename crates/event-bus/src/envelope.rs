use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::Message;

/// Unique identifier for a published event.
///
/// Publishing the same event id twice stores it once, so a publish retried
/// after an ambiguous failure does not duplicate the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event within its topic.
///
/// The first event of a topic is at offset 1. A consumer group that has
/// committed nothing is at [`Offset::start`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(i64);

impl Offset {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The cursor position before any event.
    pub fn start() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event as stored on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The topic the event was published to (e.g. "order.requested").
    pub topic: String,

    /// Position within the topic, assigned at publish time.
    pub offset: Offset,

    /// Ordering key, the id of the aggregate the event is about.
    pub key: String,

    /// The type of the event.
    pub event_type: String,

    /// When the event was published.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Stamps an outgoing event with its assigned offset.
    pub fn from_outgoing(event: OutgoingEvent, offset: Offset) -> Self {
        Self {
            event_id: event.event_id,
            topic: event.topic,
            offset,
            key: event.key,
            event_type: event.event_type,
            timestamp: event.timestamp,
            payload: event.payload,
            metadata: event.metadata,
        }
    }

    /// Deserializes the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// An event waiting to be published. The bus assigns its offset.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEvent {
    pub event_id: EventId,
    pub topic: String,
    pub key: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutgoingEvent {
    /// Creates a builder for an event on `topic` keyed by `key`.
    pub fn builder(topic: impl Into<String>, key: impl Into<String>) -> OutgoingEventBuilder {
        let topic = topic.into();
        OutgoingEventBuilder {
            event_id: None,
            event_type: topic.clone(),
            topic,
            key: key.into(),
            timestamp: None,
            payload: serde_json::Value::Null,
            metadata: HashMap::new(),
        }
    }

    /// Builds an event from a typed message.
    pub fn from_message<M: Message>(message: &M) -> Result<Self, serde_json::Error> {
        Ok(Self::builder(M::TOPIC, message.key().to_string())
            .event_type(message.event_type())
            .payload(message)?
            .build())
    }
}

/// Builder for constructing outgoing events.
#[derive(Debug)]
pub struct OutgoingEventBuilder {
    event_id: Option<EventId>,
    topic: String,
    key: String,
    event_type: String,
    timestamp: Option<DateTime<Utc>>,
    payload: serde_json::Value,
    metadata: HashMap<String, serde_json::Value>,
}

impl OutgoingEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type. Defaults to the topic name.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = serde_json::to_value(payload)?;
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> OutgoingEvent {
        OutgoingEvent {
            event_id: self.event_id.unwrap_or_default(),
            topic: self.topic,
            key: self.key,
            event_type: self.event_type,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_defaults_to_topic() {
        let event = OutgoingEvent::builder("order.requested", "k1").build();
        assert_eq!(event.event_type, "order.requested");
        assert_eq!(event.payload, serde_json::Value::Null);
    }

    #[test]
    fn envelope_keeps_outgoing_fields() {
        let event = OutgoingEvent::builder("product.updated", "p-1")
            .event_type("ProductUpdated")
            .payload_raw(serde_json::json!({"quantity": 4}))
            .metadata("correlation_id", serde_json::json!("abc"))
            .build();
        let event_id = event.event_id;

        let envelope = EventEnvelope::from_outgoing(event, Offset::new(7));

        assert_eq!(envelope.event_id, event_id);
        assert_eq!(envelope.offset, Offset::new(7));
        assert_eq!(envelope.key, "p-1");
        assert_eq!(envelope.event_type, "ProductUpdated");
        assert_eq!(
            envelope.metadata.get("correlation_id"),
            Some(&serde_json::json!("abc"))
        );

        #[derive(Deserialize)]
        struct Quantity {
            quantity: i64,
        }
        let decoded: Quantity = envelope.decode().unwrap();
        assert_eq!(decoded.quantity, 4);
    }

    #[test]
    fn offsets_start_before_first_event() {
        assert_eq!(Offset::start().next(), Offset::new(1));
        assert!(Offset::new(2) > Offset::start());
    }
}
