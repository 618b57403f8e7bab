//! Payment gateway port and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::Money;
use thiserror::Error;
use tokio::sync::Mutex;

/// Why a charge did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The card was refused. Never retried.
    #[error("declined: {0}")]
    Declined(String),

    /// The gateway could not be reached or failed internally.
    #[error("gateway error: {0}")]
    Unavailable(String),
}

/// An external card processor.
///
/// `idempotency_key` identifies the purchase: charging the same key twice
/// returns the first charge id instead of charging again.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` to the card behind `token` and returns the charge id.
    async fn charge(
        &self,
        amount: Money,
        token: &str,
        idempotency_key: AggregateId,
    ) -> Result<String, GatewayError>;
}

/// Tokens the in-memory gateway always declines.
pub const DECLINED_TOKEN: &str = "tok_chargeDeclined";

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: HashMap<AggregateId, (String, Money)>,
    next_id: u32,
    fail_next: u32,
    delay: Option<Duration>,
}

/// In-memory gateway for tests and local runs.
///
/// Declines [`DECLINED_TOKEN`] and any empty token.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` charges fail as unavailable.
    pub async fn fail_next_charges(&self, count: u32) {
        self.state.lock().await.fail_next = count;
    }

    /// Makes every charge take at least `delay`.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.delay = delay;
    }

    /// Returns the number of distinct charges made.
    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charges.len()
    }

    /// Returns the total charged across all purchases, or `None` if it
    /// does not fit in [`Money`].
    pub async fn total_charged(&self) -> Option<Money> {
        Money::checked_sum(self.state.lock().await.charges.values().map(|(_, amount)| *amount))
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(
        &self,
        amount: Money,
        token: &str,
        idempotency_key: AggregateId,
    ) -> Result<String, GatewayError> {
        let delay = self.state.lock().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }
        if token.is_empty() || token == DECLINED_TOKEN {
            return Err(GatewayError::Declined("card declined".to_string()));
        }
        if let Some((charge_id, _)) = state.charges.get(&idempotency_key) {
            return Ok(charge_id.clone());
        }

        state.next_id += 1;
        let charge_id = format!("ch_{:06}", state.next_id);
        state.charges.insert(idempotency_key, (charge_id.clone(), amount));
        Ok(charge_id)
    }
}
