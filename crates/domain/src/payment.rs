//! Payment record, written once per successfully charged order.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Aggregate, Money};

/// A successful charge.
///
/// Stored keyed by the order id, so a second payment record for the same
/// order is rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: AggregateId,
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub charge_id: String,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        order_id: AggregateId,
        user_id: UserId,
        charge_id: impl Into<String>,
        amount: Money,
    ) -> Self {
        Self {
            id: AggregateId::new(),
            order_id,
            user_id,
            charge_id: charge_id.into(),
            amount,
            created_at: Utc::now(),
        }
    }
}

impl Aggregate for Payment {
    type Error = std::convert::Infallible;

    fn aggregate_type() -> &'static str {
        "Payment"
    }

    fn id(&self) -> AggregateId {
        self.order_id
    }
}
