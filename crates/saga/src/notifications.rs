//! Live order updates for buyers.

use async_trait::async_trait;
use common::{AggregateId, UserId};
use domain::{OrderCancelled, PaymentCompleted};
use event_bus::{Handler, HandlerResult};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCompleted,
    OrderCancelled,
}

/// A push to one buyer about one of their orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: UserId,
    pub order_id: AggregateId,
    pub kind: NotificationKind,
}

/// Fans order updates out to every open buyer connection.
///
/// Delivery is best effort: with no subscriber the notification is dropped,
/// and a subscriber that falls behind loses the oldest ones.
#[derive(Clone)]
pub struct NotificationService {
    sender: broadcast::Sender<Notification>,
}

impl NotificationService {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    fn notify(&self, notification: Notification) {
        let receivers = self.sender.send(notification.clone()).unwrap_or(0);
        tracing::debug!(
            user_id = %notification.user_id,
            order_id = %notification.order_id,
            kind = ?notification.kind,
            receivers,
            "notification sent"
        );
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Handler<PaymentCompleted> for NotificationService {
    async fn handle(&self, message: PaymentCompleted) -> HandlerResult {
        self.notify(Notification {
            user_id: message.user_id,
            order_id: message.order_id,
            kind: NotificationKind::OrderCompleted,
        });
        Ok(())
    }
}

#[async_trait]
impl Handler<OrderCancelled> for NotificationService {
    async fn handle(&self, message: OrderCancelled) -> HandlerResult {
        self.notify(Notification {
            user_id: message.user_id,
            order_id: message.order_id,
            kind: NotificationKind::OrderCancelled,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{CancelReason, Money};

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_updates() {
        let service = NotificationService::default();
        let mut rx = service.subscribe();
        let user_id = UserId::new();
        let order_id = AggregateId::new();

        service
            .handle(PaymentCompleted {
                order_id,
                user_id,
                charged_items: vec![],
                charge_id: "ch_1".into(),
                amount: Money::from_cents(100),
            })
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, NotificationKind::OrderCompleted);
        assert_eq!(received.user_id, user_id);
        assert_eq!(received.order_id, order_id);
    }

    #[tokio::test]
    async fn no_subscriber_is_not_an_error() {
        let service = NotificationService::default();
        let result = service
            .handle(OrderCancelled {
                order_id: AggregateId::new(),
                user_id: UserId::new(),
                restored_items: vec![],
                reason: CancelReason::Expired,
            })
            .await;
        assert!(result.is_ok());
    }
}
