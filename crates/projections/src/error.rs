//! Projection error types.

use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the replica's store.
    #[error("Store error: {0}")]
    Store(#[from] version_store::StoreError),

    #[error("Domain error: {0}")]
    Domain(#[from] domain::DomainError),

    /// An error occurred reading from the bus.
    #[error("Bus error: {0}")]
    Bus(#[from] event_bus::BusError),

    /// Failed to deserialize an event payload.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl ProjectionError {
    /// Returns true if the event can never be applied and should be skipped.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProjectionError::Deserialization(_))
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
