//! Saga error types.
//!
//! Lower-level errors are folded into the storefront's error taxonomy on
//! conversion, so callers match on what happened rather than on which
//! layer noticed it.

use common::{AggregateId, UserId};
use domain::{CartError, DomainError, OrderError, OrderStatus};
use event_bus::{BusError, HandlerError};
use inventory::LedgerError;
use projections::ProjectionError;
use thiserror::Error;
use version_store::StoreError;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Cart is empty")]
    EmptyCart,

    /// A product in the cart or order does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(AggregateId),

    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: AggregateId,
        requested: u32,
        available: u32,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: AggregateId },

    /// The acting user does not own the order.
    #[error("User {user_id} does not own order {order_id}")]
    Unauthorized {
        order_id: AggregateId,
        user_id: UserId,
    },

    /// The order already reached a status that forbids the operation.
    #[error("Cannot {action} order in {status} status")]
    OrderClosed {
        status: OrderStatus,
        action: &'static str,
    },

    /// Another writer got there first. Retrying may succeed.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Payment declined: {0}")]
    GatewayDeclined(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Rejected input, such as an empty title or a negative price.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if the operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::ConcurrencyConflict(_) | SagaError::GatewayUnavailable(_) => true,
            SagaError::Store(e) => matches!(e, StoreError::Database(_)),
            SagaError::Ledger(e) => e.is_transient(),
            SagaError::Bus(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Maps the error for a bus consumer: transient errors redeliver, the
    /// rest are logged and skipped.
    pub fn into_handler_error(self) -> HandlerError {
        if self.is_transient() {
            HandlerError::transient(self)
        } else {
            HandlerError::rejected(self)
        }
    }
}

impl From<StoreError> for SagaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConcurrencyConflict { .. } => SagaError::ConcurrencyConflict(e.to_string()),
            other => SagaError::Store(other),
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Unauthorized { order_id, user_id } => {
                SagaError::Unauthorized { order_id, user_id }
            }
            OrderError::InvalidStateTransition { current, action } => SagaError::OrderClosed {
                status: current,
                action,
            },
            OrderError::NoLines | OrderError::InvalidQuantity | OrderError::TotalOverflow => {
                SagaError::Validation(e.to_string())
            }
        }
    }
}

impl From<CartError> for SagaError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::Empty => SagaError::EmptyCart,
        }
    }
}

impl From<DomainError> for SagaError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Store(e) => e.into(),
            DomainError::Cart(e) => e.into(),
            DomainError::Order(e) => e.into(),
            DomainError::Product(e) => SagaError::Validation(e.to_string()),
            DomainError::NotFound {
                aggregate_type,
                aggregate_id,
            } => SagaError::NotFound {
                entity: aggregate_type,
                id: aggregate_id,
            },
        }
    }
}

impl From<LedgerError> for SagaError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => SagaError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            LedgerError::ProductNotFound(id) => SagaError::ProductNotFound(id),
            LedgerError::ConcurrencyConflict { .. }
            | LedgerError::ReservationInProgress(_)
            | LedgerError::ClaimLost(_) => SagaError::ConcurrencyConflict(e.to_string()),
            // Only a cancellation releases a reservation.
            LedgerError::ReservationClosed { .. } => SagaError::OrderClosed {
                status: OrderStatus::Cancelled,
                action: "reserve",
            },
            LedgerError::Product(e) => SagaError::Validation(e.to_string()),
            LedgerError::Bus(e) => SagaError::Bus(e),
            other => SagaError::Ledger(other),
        }
    }
}

impl From<ProjectionError> for SagaError {
    fn from(e: ProjectionError) -> Self {
        match e {
            ProjectionError::Store(e) => e.into(),
            ProjectionError::Domain(e) => e.into(),
            ProjectionError::Bus(e) => SagaError::Bus(e),
            ProjectionError::Deserialization(e) => SagaError::Serialization(e),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use version_store::Version;

    #[test]
    fn conflicts_are_folded_and_transient() {
        let id = AggregateId::new();
        let store = StoreError::ConcurrencyConflict {
            aggregate_id: id,
            expected: Version::new(1),
            actual: Version::new(2),
        };
        let err: SagaError = DomainError::Store(store).into();
        assert!(matches!(err, SagaError::ConcurrencyConflict(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn unauthorized_survives_conversion() {
        let order_id = AggregateId::new();
        let user_id = UserId::new();
        let err: SagaError = DomainError::Order(OrderError::Unauthorized { order_id, user_id }).into();
        assert!(matches!(err, SagaError::Unauthorized { .. }));
        assert!(matches!(err.into_handler_error(), HandlerError::Rejected(_)));
    }

    #[test]
    fn lost_reservation_claim_is_a_conflict() {
        let err: SagaError = LedgerError::ClaimLost(AggregateId::new()).into();
        assert!(matches!(err, SagaError::ConcurrencyConflict(_)));
    }

    #[test]
    fn oversized_total_is_a_validation_error() {
        let err: SagaError = OrderError::TotalOverflow.into();
        assert!(matches!(err, SagaError::Validation(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn insufficient_stock_is_not_retried() {
        let err: SagaError = LedgerError::InsufficientStock {
            product_id: AggregateId::new(),
            requested: 3,
            available: 1,
        }
        .into();
        assert!(!err.is_transient());
    }

    #[test]
    fn missing_aggregate_names_its_type() {
        let id = AggregateId::new();
        let err: SagaError = DomainError::NotFound {
            aggregate_type: "Order",
            aggregate_id: id,
        }
        .into();
        assert_eq!(err.to_string(), format!("Order not found: {id}"));
    }
}
