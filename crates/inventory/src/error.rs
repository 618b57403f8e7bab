use common::AggregateId;
use domain::ProductError;
use event_bus::BusError;
use thiserror::Error;
use version_store::Version;

use crate::ReservationStatus;

/// Errors that can occur in the inventory ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Not enough stock for one of the requested items.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: AggregateId,
        requested: u32,
        available: u32,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(AggregateId),

    #[error("Product already exists: {0}")]
    ProductExists(AggregateId),

    /// The product changed since it was read.
    #[error(
        "Concurrency conflict for product {product_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        product_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// Another reservation for the same order is being made right now.
    #[error("Reservation for order {0} is in progress")]
    ReservationInProgress(AggregateId),

    /// The order's reservation was released or committed and cannot be reused.
    #[error("Reservation for order {order_id} is {status}")]
    ReservationClosed {
        order_id: AggregateId,
        status: ReservationStatus,
    },

    /// A stale reserve's claim was taken over by a newer attempt.
    #[error("Reservation claim for order {0} was lost")]
    ClaimLost(AggregateId),

    #[error("Invalid product: {0}")]
    Product(ProductError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl LedgerError {
    /// Returns true for version conflicts and concurrent reservations.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict { .. }
                | LedgerError::ReservationInProgress(_)
                | LedgerError::ClaimLost(_)
        )
    }

    /// Returns true if the operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Database(_) => true,
            LedgerError::Bus(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<ProductError> for LedgerError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::InsufficientStock {
                product_id,
                requested,
                available,
            } => LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => LedgerError::Product(other),
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
