//! Core aggregate trait.

use common::AggregateId;

/// Trait for aggregates persisted in a version store.
///
/// An aggregate is the unit of consistency: every write replaces its whole
/// state at once and is checked against the version it was read at.
/// Command methods take `&self` and return the next state, so a rejected
/// command never leaves a half-modified aggregate behind.
pub trait Aggregate: Clone + Send + Sync + 'static {
    /// The type of errors this aggregate's commands can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name, used in logs and errors.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    fn id(&self) -> AggregateId;
}
