use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the version store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied version is stale. The caller may re-read and retry.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The aggregate does not exist.
    #[error("Aggregate not found: {0}")]
    NotFound(AggregateId),

    /// An aggregate with this id already exists.
    #[error("Aggregate already exists: {0}")]
    AlreadyExists(AggregateId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for a stale-version rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for version store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
