//! Eventually-consistent copies of data owned by another service.
//!
//! Replicas are only used for read-side validation. Stock decisions always
//! go to the inventory ledger.

use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Aggregate, LineItem, Money, OrderError, OrderRequested, OrderStatus};

/// A product as last seen on `product.updated`.
///
/// Stored with the source product's version, so older snapshots never
/// overwrite newer ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub product_id: AggregateId,
    pub title: String,
    pub price: Money,
    pub quantity: u32,
}

impl Aggregate for ProductSnapshot {
    type Error = std::convert::Infallible;

    fn aggregate_type() -> &'static str {
        "ProductSnapshot"
    }

    fn id(&self) -> AggregateId {
        self.product_id
    }
}

/// The payment service's copy of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReplica {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    pub total: Money,
}

impl Aggregate for OrderReplica {
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "OrderReplica"
    }

    fn id(&self) -> AggregateId {
        self.order_id
    }
}

impl OrderReplica {
    pub fn from_request(request: &OrderRequested) -> Self {
        Self {
            order_id: request.order_id,
            user_id: request.user_id,
            status: OrderStatus::Created,
            items: request.items.iter().map(|line| line.line_item()).collect(),
            total: request.total,
        }
    }

    pub fn ensure_owner(&self, user_id: UserId) -> Result<(), OrderError> {
        if self.user_id != user_id {
            return Err(OrderError::Unauthorized {
                order_id: self.order_id,
                user_id,
            });
        }
        Ok(())
    }

    /// Fails unless the replica is still `Created`.
    pub fn ensure_payable(&self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Created {
            return Err(OrderError::InvalidStateTransition {
                current: self.status,
                action: "pay",
            });
        }
        Ok(())
    }

    /// Returns the cancelled replica, or None if it is already cancelled.
    pub fn cancel(&self) -> Result<Option<Self>, OrderError> {
        self.transition(OrderStatus::Cancelled, "cancel")
    }

    /// Returns the completed replica, or None if it is already complete.
    pub fn complete(&self) -> Result<Option<Self>, OrderError> {
        self.transition(OrderStatus::Complete, "complete")
    }

    /// Returns the replica as `Complete` for a charge that went through, or
    /// None if it already is. A completed payment outranks a cancellation,
    /// since a payment is only reported after the order was completed.
    pub fn record_payment(&self) -> Option<Self> {
        if self.status == OrderStatus::Complete {
            return None;
        }
        Some(Self {
            status: OrderStatus::Complete,
            ..self.clone()
        })
    }

    fn transition(&self, to: OrderStatus, action: &'static str) -> Result<Option<Self>, OrderError> {
        if self.status == to {
            return Ok(None);
        }
        if self.status.is_terminal() {
            return Err(OrderError::InvalidStateTransition {
                current: self.status,
                action,
            });
        }
        Ok(Some(Self {
            status: to,
            ..self.clone()
        }))
    }
}
