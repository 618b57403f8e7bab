//! Order aggregate and its status machine.

use chrono::{DateTime, Duration, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Aggregate, LineItem, Money, OrderLine};

/// The status of an order in its lifecycle.
///
/// ```text
/// Created ──┬──► Complete
///           └──► Cancelled
/// ```
///
/// Both outcomes are terminal. Cancelling a cancelled order is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Complete,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Complete | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::Complete => "Complete",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an order was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelReason {
    /// The owner cancelled it.
    User,
    /// It stayed `Created` past its expiry time.
    Expired,
}

/// Errors that can occur on order commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Cannot {action} order in {current} status")]
    InvalidStateTransition {
        current: OrderStatus,
        action: &'static str,
    },

    #[error("User {user_id} does not own order {order_id}")]
    Unauthorized {
        order_id: AggregateId,
        user_id: UserId,
    },

    #[error("Order must have at least one line")]
    NoLines,

    #[error("Order line quantity must be positive")]
    InvalidQuantity,

    #[error("Order total is too large")]
    TotalOverflow,
}

/// An order with the line snapshots taken at checkout.
///
/// Lines and total are fixed at creation; only the status moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: AggregateId,
    user_id: UserId,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    total: Money,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cancel_reason: Option<CancelReason>,
}

impl Aggregate for Order {
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> AggregateId {
        self.id
    }
}

impl Order {
    /// Creates an order in `Created` status, computing its total once.
    pub fn create(
        id: AggregateId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        created_at: DateTime<Utc>,
        time_to_live: Duration,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        if lines.iter().any(|line| line.quantity == 0) {
            return Err(OrderError::InvalidQuantity);
        }

        let total = OrderLine::total(&lines).ok_or(OrderError::TotalOverflow)?;
        Ok(Self {
            id,
            user_id,
            status: OrderStatus::Created,
            lines,
            total,
            created_at,
            expires_at: created_at + time_to_live,
            cancel_reason: None,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    /// Returns `{product_id, quantity}` for every line.
    pub fn line_items(&self) -> Vec<LineItem> {
        self.lines.iter().map(OrderLine::line_item).collect()
    }

    /// Returns true if the order is still `Created` at or after its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Created && self.expires_at <= now
    }

    /// Fails unless `user_id` owns the order.
    pub fn ensure_owner(&self, user_id: UserId) -> Result<(), OrderError> {
        if self.user_id != user_id {
            return Err(OrderError::Unauthorized {
                order_id: self.id,
                user_id,
            });
        }
        Ok(())
    }

    /// Returns the cancelled order, or None if it is already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> Result<Option<Self>, OrderError> {
        match self.status {
            OrderStatus::Created => Ok(Some(Self {
                status: OrderStatus::Cancelled,
                cancel_reason: Some(reason),
                ..self.clone()
            })),
            OrderStatus::Cancelled => Ok(None),
            OrderStatus::Complete => Err(OrderError::InvalidStateTransition {
                current: self.status,
                action: "cancel",
            }),
        }
    }

    /// Returns the completed order, or None if it is already complete.
    pub fn complete(&self) -> Result<Option<Self>, OrderError> {
        match self.status {
            OrderStatus::Created => Ok(Some(Self {
                status: OrderStatus::Complete,
                ..self.clone()
            })),
            OrderStatus::Complete => Ok(None),
            OrderStatus::Cancelled => Err(OrderError::InvalidStateTransition {
                current: self.status,
                action: "complete",
            }),
        }
    }
}
