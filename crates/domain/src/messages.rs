//! Messages exchanged by the storefront services over the bus.
//!
//! Payloads use camelCase field names on the wire. Every message is keyed by
//! the aggregate it is about, so events for one order (or one product) are
//! consumed in the order they were published.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_bus::Message;
use serde::{Deserialize, Serialize};
use version_store::Version;

use crate::{CancelReason, LineItem, Money, OrderLine};

/// Topic names.
pub mod topics {
    pub const ORDER_REQUESTED: &str = "order.requested";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
    pub const PRODUCT_UPDATED: &str = "product.updated";
}

/// A cart was checked out. First step of the order saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequested {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub items: Vec<OrderLine>,
    pub total: Money,
    pub requested_at: DateTime<Utc>,
}

impl Message for OrderRequested {
    const TOPIC: &'static str = topics::ORDER_REQUESTED;

    fn key(&self) -> AggregateId {
        self.order_id
    }
}

/// An order was cancelled; its reserved stock must be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub restored_items: Vec<LineItem>,
    pub reason: CancelReason,
}

impl Message for OrderCancelled {
    const TOPIC: &'static str = topics::ORDER_CANCELLED;

    fn key(&self) -> AggregateId {
        self.order_id
    }
}

/// An order was charged. Its stock stays debited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub charged_items: Vec<LineItem>,
    pub charge_id: String,
    pub amount: Money,
}

impl Message for PaymentCompleted {
    const TOPIC: &'static str = topics::PAYMENT_COMPLETED;

    fn key(&self) -> AggregateId {
        self.order_id
    }
}

/// Absolute state of a product after a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdated {
    pub product_id: AggregateId,
    pub title: String,
    pub price: Money,
    pub quantity: u32,
    pub version: Version,
}

impl Message for ProductUpdated {
    const TOPIC: &'static str = topics::PRODUCT_UPDATED;

    fn key(&self) -> AggregateId {
        self.product_id
    }
}
