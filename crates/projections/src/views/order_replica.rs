//! The payment service's replica of orders.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::messages::topics;
use domain::{
    CommandResult, DomainError, Money, OrderCancelled, OrderError, OrderReplica, OrderRequested,
    OrderStatus, PaymentCompleted, Repository,
};
use event_bus::EventEnvelope;
use tokio::sync::RwLock;
use version_store::{StoreError, VersionStore, Versioned};

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};

const WRITE_ATTEMPTS: u32 = 5;

/// Orders as seen by the payment service.
///
/// Created from `order.requested`, flipped to `Cancelled` by
/// `order.cancelled` and to `Complete` by `payment.completed`. The payment
/// service also flips it to `Complete` itself when a charge succeeds, so a
/// rebuilt replica ends up where the live one was whatever order the
/// topics are replayed in.
#[derive(Clone)]
pub struct OrderReplicaView {
    name: &'static str,
    repository: Repository<OrderReplica>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl OrderReplicaView {
    /// Creates a view over `store`, consuming as group `name`.
    pub fn new(name: &'static str, store: Arc<dyn VersionStore<OrderReplica>>) -> Self {
        Self {
            name,
            repository: Repository::new(store),
            position: Arc::new(RwLock::new(ProjectionPosition::default())),
        }
    }

    pub async fn get(&self, order_id: AggregateId) -> Result<Option<Versioned<OrderReplica>>> {
        Ok(self.repository.load(order_id).await?)
    }

    /// Marks a replica `Complete` after a successful charge.
    ///
    /// Fails if the replica was cancelled in the meantime.
    pub async fn mark_complete(&self, order_id: AggregateId) -> Result<CommandResult<OrderReplica>> {
        Ok(self
            .repository
            .execute_with_retry(order_id, WRITE_ATTEMPTS, OrderReplica::complete)
            .await?)
    }

    async fn on_requested(&self, request: OrderRequested) -> Result<()> {
        match self.repository.create(OrderReplica::from_request(&request)).await {
            Ok(_) => Ok(()),
            Err(DomainError::Store(StoreError::AlreadyExists(_))) => {
                tracing::debug!(order_id = %request.order_id, "order replica already present");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_cancelled(&self, cancelled: OrderCancelled) -> Result<()> {
        let order_id = cancelled.order_id;

        // A cancellation consumed before its request leaves a cancelled
        // replica, and the late request is then ignored as a duplicate.
        let placeholder = || OrderReplica {
            order_id,
            user_id: cancelled.user_id,
            status: OrderStatus::Created,
            items: cancelled.restored_items.clone(),
            total: Money::zero(),
        };

        self.repository
            .upsert_with_retry(order_id, WRITE_ATTEMPTS, placeholder, |replica| {
                match replica.cancel() {
                    Err(OrderError::InvalidStateTransition { current, .. }) => {
                        tracing::warn!(
                            %order_id,
                            %current,
                            "order cancelled after payment completed, keeping replica"
                        );
                        Ok(None)
                    }
                    other => other,
                }
            })
            .await?;
        Ok(())
    }

    async fn on_completed(&self, paid: PaymentCompleted) -> Result<()> {
        let order_id = paid.order_id;

        let placeholder = || OrderReplica {
            order_id,
            user_id: paid.user_id,
            status: OrderStatus::Created,
            items: paid.charged_items.clone(),
            total: paid.amount,
        };

        self.repository
            .upsert_with_retry(order_id, WRITE_ATTEMPTS, placeholder, |replica| {
                if replica.status == OrderStatus::Cancelled {
                    tracing::warn!(%order_id, "payment completed for a cancelled replica, marking complete");
                }
                Ok(replica.record_payment())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Projection for OrderReplicaView {
    fn name(&self) -> &'static str {
        self.name
    }

    fn topics(&self) -> &'static [&'static str] {
        &[
            topics::ORDER_REQUESTED,
            topics::ORDER_CANCELLED,
            topics::PAYMENT_COMPLETED,
        ]
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        match event.topic.as_str() {
            topics::ORDER_REQUESTED => self.on_requested(event.decode()?).await?,
            topics::ORDER_CANCELLED => self.on_cancelled(event.decode()?).await?,
            topics::PAYMENT_COMPLETED => self.on_completed(event.decode()?).await?,
            other => {
                tracing::debug!(replica = self.name, topic = other, "ignoring event");
                return Ok(());
            }
        }

        let mut pos = self.position.write().await;
        *pos = pos.record(event);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.repository.store().clear().await?;
        *self.position.write().await = ProjectionPosition::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::UserId;
    use domain::{CancelReason, LineItem, OrderLine};
    use event_bus::{Message, Offset, OutgoingEvent};
    use version_store::{InMemoryVersionStore, Version};

    use super::*;
    use crate::ProjectionError;

    fn view() -> OrderReplicaView {
        OrderReplicaView::new("test.orders", Arc::new(InMemoryVersionStore::new("order_replicas")))
    }

    fn envelope<M: Message>(message: &M) -> EventEnvelope {
        EventEnvelope::from_outgoing(OutgoingEvent::from_message(message).unwrap(), Offset::new(1))
    }

    fn requested() -> OrderRequested {
        OrderRequested {
            order_id: AggregateId::new(),
            user_id: UserId::new(),
            items: vec![OrderLine::new(AggregateId::new(), 2, Money::from_cents(1000), "P1")],
            total: Money::from_cents(2000),
            requested_at: Utc::now(),
        }
    }

    fn cancelled(request: &OrderRequested) -> OrderCancelled {
        OrderCancelled {
            order_id: request.order_id,
            user_id: request.user_id,
            restored_items: vec![LineItem::new(request.items[0].product_id, 2)],
            reason: CancelReason::User,
        }
    }

    #[tokio::test]
    async fn requested_creates_replica_once() {
        let view = view();
        let request = requested();

        view.handle(&envelope(&request)).await.unwrap();
        view.handle(&envelope(&request)).await.unwrap();

        let replica = view.get(request.order_id).await.unwrap().unwrap();
        assert_eq!(replica.version, Version::first());
        assert_eq!(replica.data.status, OrderStatus::Created);
        assert_eq!(replica.data.total, Money::from_cents(2000));
    }

    #[tokio::test]
    async fn cancelled_flips_replica() {
        let view = view();
        let request = requested();
        view.handle(&envelope(&request)).await.unwrap();

        view.handle(&envelope(&cancelled(&request))).await.unwrap();
        view.handle(&envelope(&cancelled(&request))).await.unwrap();

        let replica = view.get(request.order_id).await.unwrap().unwrap();
        assert_eq!(replica.data.status, OrderStatus::Cancelled);
        assert_eq!(replica.version, Version::new(2));
    }

    #[tokio::test]
    async fn cancellation_before_request_wins() {
        let view = view();
        let request = requested();

        view.handle(&envelope(&cancelled(&request))).await.unwrap();
        view.handle(&envelope(&request)).await.unwrap();

        let replica = view.get(request.order_id).await.unwrap().unwrap();
        assert_eq!(replica.data.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancellation_after_completion_is_ignored() {
        let view = view();
        let request = requested();
        view.handle(&envelope(&request)).await.unwrap();
        view.mark_complete(request.order_id).await.unwrap();

        view.handle(&envelope(&cancelled(&request))).await.unwrap();

        let replica = view.get(request.order_id).await.unwrap().unwrap();
        assert_eq!(replica.data.status, OrderStatus::Complete);
    }

    fn completed(request: &OrderRequested) -> PaymentCompleted {
        PaymentCompleted {
            order_id: request.order_id,
            user_id: request.user_id,
            charged_items: vec![LineItem::new(request.items[0].product_id, 2)],
            charge_id: "ch_000001".into(),
            amount: request.total,
        }
    }

    #[tokio::test]
    async fn completion_survives_a_rebuild() {
        let view = view();
        let request = requested();
        view.handle(&envelope(&request)).await.unwrap();
        view.mark_complete(request.order_id).await.unwrap();
        view.handle(&envelope(&completed(&request))).await.unwrap();

        view.reset().await.unwrap();
        assert!(view.get(request.order_id).await.unwrap().is_none());
        view.handle(&envelope(&request)).await.unwrap();
        view.handle(&envelope(&completed(&request))).await.unwrap();

        let replica = view.get(request.order_id).await.unwrap().unwrap();
        assert_eq!(replica.data.status, OrderStatus::Complete);
        assert_eq!(replica.data.total, Money::from_cents(2000));
    }

    #[tokio::test]
    async fn completion_wins_whatever_the_replay_order() {
        let view = view();
        let request = requested();

        view.handle(&envelope(&completed(&request))).await.unwrap();
        view.handle(&envelope(&request)).await.unwrap();
        view.handle(&envelope(&cancelled(&request))).await.unwrap();
        let replica = view.get(request.order_id).await.unwrap().unwrap();
        assert_eq!(replica.data.status, OrderStatus::Complete);
        assert_eq!(replica.data.user_id, request.user_id);

        let other = requested();
        view.handle(&envelope(&other)).await.unwrap();
        view.handle(&envelope(&cancelled(&other))).await.unwrap();
        view.handle(&envelope(&completed(&other))).await.unwrap();
        let replica = view.get(other.order_id).await.unwrap().unwrap();
        assert_eq!(replica.data.status, OrderStatus::Complete);
    }

    #[tokio::test]
    async fn mark_complete_refuses_cancelled_replica() {
        let view = view();
        let request = requested();
        view.handle(&envelope(&request)).await.unwrap();
        view.handle(&envelope(&cancelled(&request))).await.unwrap();

        let result = view.mark_complete(request.order_id).await;
        assert!(matches!(
            result,
            Err(ProjectionError::Domain(DomainError::Order(OrderError::InvalidStateTransition { .. })))
        ));
    }
}
