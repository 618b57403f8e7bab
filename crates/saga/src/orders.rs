//! Order service: owns orders and drives their status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{
    CancelReason, DomainError, Order, OrderCancelled, OrderRequested, PaymentCompleted, Repository,
};
use event_bus::{Backoff, EventBus, Handler, HandlerError, HandlerResult, OutgoingEvent, publish_with_retry};
use tokio::sync::watch;
use version_store::{StoreError, VersionStore};

use crate::{Result, SagaError};

const WRITE_ATTEMPTS: u32 = 5;

/// Who is cancelling an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The buyer. Must own the order.
    User(UserId),
    /// The expiry sweep.
    System,
}

#[derive(Clone)]
pub struct OrderService {
    orders: Repository<Order>,
    bus: Arc<dyn EventBus>,
    time_to_live: chrono::Duration,
    backoff: Backoff,
}

impl OrderService {
    pub fn new(store: Arc<dyn VersionStore<Order>>, bus: Arc<dyn EventBus>, time_to_live: Duration) -> Self {
        Self {
            orders: Repository::new(store),
            bus,
            time_to_live: chrono::Duration::from_std(time_to_live).unwrap_or_else(|_| chrono::Duration::days(365)),
            backoff: Backoff::default(),
        }
    }

    /// Sets the backoff used when publishing fails transiently.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns an order to its owner.
    pub async fn order(&self, order_id: AggregateId, user_id: UserId) -> Result<Order> {
        let order = self.orders.load_required(order_id).await?.data;
        order.ensure_owner(user_id)?;
        Ok(order)
    }

    /// Creates the order described by an `order.requested` event.
    ///
    /// A redelivered request finds the order already stored and changes
    /// nothing.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_from_request(&self, request: OrderRequested) -> Result<bool> {
        let order = Order::create(
            request.order_id,
            request.user_id,
            request.items,
            request.requested_at,
            self.time_to_live,
        )?;

        match self.orders.create(order).await {
            Ok(saved) => {
                tracing::info!(total = %saved.data.total(), "order created");
                Ok(true)
            }
            Err(DomainError::Store(StoreError::AlreadyExists(_))) => {
                tracing::debug!("duplicate order request");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancels an order on behalf of its owner.
    pub async fn cancel_order(&self, order_id: AggregateId, user_id: UserId) -> Result<Order> {
        self.cancel(order_id, Actor::User(user_id), CancelReason::User).await
    }

    /// Cancels an order and announces it on `order.cancelled`.
    ///
    /// Cancelling a cancelled order changes nothing and publishes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: AggregateId, actor: Actor, reason: CancelReason) -> Result<Order> {
        let result = self
            .orders
            .execute_with_retry(order_id, WRITE_ATTEMPTS, |order| {
                if let Actor::User(user_id) = actor {
                    order.ensure_owner(user_id)?;
                }
                order.cancel(reason)
            })
            .await?;

        if result.changed {
            let order = &result.aggregate;
            let message = OrderCancelled {
                order_id,
                user_id: order.user_id(),
                restored_items: order.line_items(),
                reason,
            };
            let event = OutgoingEvent::from_message(&message)?;
            publish_with_retry(self.bus.as_ref(), event, self.backoff.clone()).await?;
            tracing::info!(?reason, "order cancelled");
        }

        Ok(result.aggregate)
    }

    /// Cancels every `Created` order whose expiry time has passed.
    ///
    /// Returns the ids of the orders cancelled. Failures are logged and the
    /// order is picked up again by the next sweep.
    #[tracing::instrument(skip(self))]
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<AggregateId>> {
        let due: Vec<AggregateId> = self
            .orders
            .store()
            .list()
            .await?
            .into_iter()
            .filter(|order| order.data.is_expired(now))
            .map(|order| order.id)
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for order_id in due {
            match self.cancel(order_id, Actor::System, CancelReason::Expired).await {
                Ok(_) => {
                    metrics::counter!("orders_expired_total").increment(1);
                    expired.push(order_id);
                }
                // Paid between the listing and the cancel.
                Err(SagaError::OrderClosed { .. }) => {}
                Err(e) => tracing::warn!(%order_id, error = %e, "could not expire order"),
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired orders cancelled");
        }
        Ok(expired)
    }

    /// Runs [`expire_due`](Self::expire_due) every `interval` until shutdown.
    pub async fn run_expiry_sweeper(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.expire_due(Utc::now()).await {
                tracing::warn!(error = %e, "expiry sweep failed");
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(interval) => {}
            }
            if shutdown.has_changed().is_err() {
                break;
            }
        }
        tracing::info!("expiry sweeper stopped");
    }

    /// Marks a paid order `Complete`.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, order_id: AggregateId) -> Result<Order> {
        let result = self
            .orders
            .execute_with_retry(order_id, WRITE_ATTEMPTS, Order::complete)
            .await?;
        if result.changed {
            tracing::info!("order complete");
        }
        Ok(result.aggregate)
    }
}

#[async_trait]
impl Handler<OrderRequested> for OrderService {
    async fn handle(&self, message: OrderRequested) -> HandlerResult {
        self.create_from_request(message)
            .await
            .map(|_| ())
            .map_err(SagaError::into_handler_error)
    }
}

#[async_trait]
impl Handler<PaymentCompleted> for OrderService {
    async fn handle(&self, message: PaymentCompleted) -> HandlerResult {
        match self.complete(message.order_id).await {
            Ok(_) => Ok(()),
            // The request has not been consumed yet; try again later.
            Err(SagaError::NotFound { .. }) => Err(HandlerError::transient(format!(
                "order {} not created yet",
                message.order_id
            ))),
            Err(SagaError::OrderClosed { status, .. }) => {
                tracing::error!(
                    order_id = %message.order_id,
                    charge_id = %message.charge_id,
                    %status,
                    "payment completed for a closed order, charge needs a refund"
                );
                Ok(())
            }
            Err(e) => Err(e.into_handler_error()),
        }
    }
}
