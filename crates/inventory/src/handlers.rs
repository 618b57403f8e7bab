//! Bus handlers of the product service.

use async_trait::async_trait;
use domain::{OrderCancelled, PaymentCompleted};
use event_bus::{Handler, HandlerError, HandlerResult};

use crate::{LedgerError, ProductService};

fn to_handler_error(e: LedgerError) -> HandlerError {
    if e.is_transient() || e.is_conflict() {
        HandlerError::transient(e)
    } else {
        HandlerError::rejected(e)
    }
}

/// Compensation: gives back the stock an order's reservation holds.
///
/// The quantities come from the ledger's reservation record rather than
/// from the event, so a redelivered cancel restores nothing the second time.
#[async_trait]
impl Handler<OrderCancelled> for ProductService {
    async fn handle(&self, message: OrderCancelled) -> HandlerResult {
        self.restore(message.order_id)
            .await
            .map(|_| ())
            .map_err(to_handler_error)
    }
}

/// Makes a paid order's debit permanent.
#[async_trait]
impl Handler<PaymentCompleted> for ProductService {
    async fn handle(&self, message: PaymentCompleted) -> HandlerResult {
        self.commit(message.order_id)
            .await
            .map(|_| ())
            .map_err(to_handler_error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{AggregateId, UserId};
    use domain::{CancelReason, LineItem, Money};
    use event_bus::InMemoryEventBus;

    use super::*;
    use crate::{InMemoryStockLedger, ReservationStatus};

    #[tokio::test]
    async fn redelivered_cancel_restores_once() {
        let service = ProductService::new(
            Arc::new(InMemoryStockLedger::new()),
            Arc::new(InMemoryEventBus::new()),
        );
        let p = service.create_product("P", Money::from_cents(100), 10).await.unwrap();
        let order_id = AggregateId::new();
        service.reserve(order_id, &[LineItem::new(p.id, 4)]).await.unwrap();

        let cancelled = OrderCancelled {
            order_id,
            user_id: UserId::new(),
            restored_items: vec![LineItem::new(p.id, 4)],
            reason: CancelReason::User,
        };
        service.handle(cancelled.clone()).await.unwrap();
        service.handle(cancelled).await.unwrap();

        let product = service.product(p.id).await.unwrap().unwrap();
        assert_eq!(product.data.quantity(), 10);
    }

    #[tokio::test]
    async fn payment_commits_reservation() {
        let service = ProductService::new(
            Arc::new(InMemoryStockLedger::new()),
            Arc::new(InMemoryEventBus::new()),
        );
        let p = service.create_product("P", Money::from_cents(100), 10).await.unwrap();
        let order_id = AggregateId::new();
        service.reserve(order_id, &[LineItem::new(p.id, 2)]).await.unwrap();

        service
            .handle(PaymentCompleted {
                order_id,
                user_id: UserId::new(),
                charged_items: vec![LineItem::new(p.id, 2)],
                charge_id: "ch_1".into(),
                amount: Money::from_cents(200),
            })
            .await
            .unwrap();

        let record = service.ledger().reservation(order_id).await.unwrap().unwrap();
        assert_eq!(record.status, ReservationStatus::Committed);
    }
}
