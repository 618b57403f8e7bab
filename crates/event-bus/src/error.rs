use thiserror::Error;

/// Errors that can occur when publishing to or consuming from the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus is temporarily unavailable. Retry with backoff.
    #[error("Transient bus failure: {0}")]
    Transient(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Transient(_) | BusError::Database(_))
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
