//! Cart service: cart edits and checkout, the first step of the order saga.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, UserId};
use domain::{Cart, Money, OrderError, OrderLine, OrderRequested, PaymentCompleted, Repository};
use event_bus::{Backoff, EventBus, Handler, HandlerResult, OutgoingEvent, publish_with_retry};
use serde::Serialize;
use version_store::{Version, VersionStore};

use crate::catalog::ProductCatalog;
use crate::{Result, SagaError};

const EDIT_ATTEMPTS: u32 = 5;

/// What checkout hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHandle {
    pub order_id: AggregateId,
    pub total: Money,
    pub item_count: usize,
}

#[derive(Clone)]
pub struct CartService {
    carts: Repository<Cart>,
    catalog: Arc<dyn ProductCatalog>,
    bus: Arc<dyn EventBus>,
    backoff: Backoff,
}

impl CartService {
    pub fn new(
        store: Arc<dyn VersionStore<Cart>>,
        catalog: Arc<dyn ProductCatalog>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            carts: Repository::new(store),
            catalog,
            bus,
            backoff: Backoff::default(),
        }
    }

    /// Sets the backoff used when publishing fails transiently.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the user's cart, empty if they never had one.
    pub async fn cart(&self, user_id: UserId) -> Result<Cart> {
        Ok(self
            .carts
            .load(user_id.cart_id())
            .await?
            .map(|cart| cart.data)
            .unwrap_or_else(|| Cart::new(user_id)))
    }

    /// Sets a product's quantity in the cart, overwriting any previous one.
    ///
    /// A quantity of zero removes the product.
    #[tracing::instrument(skip(self))]
    pub async fn set_item(&self, user_id: UserId, product_id: AggregateId, quantity: u32) -> Result<Cart> {
        if quantity > 0 && self.catalog.snapshot(product_id).await?.is_none() {
            return Err(SagaError::ProductNotFound(product_id));
        }

        let result = self
            .carts
            .upsert_with_retry(
                user_id.cart_id(),
                EDIT_ATTEMPTS,
                || Cart::new(user_id),
                |cart| Ok(Some(cart.with_item(product_id, quantity))),
            )
            .await?;
        Ok(result.aggregate)
    }

    pub async fn remove_item(&self, user_id: UserId, product_id: AggregateId) -> Result<Cart> {
        self.set_item(user_id, product_id, 0).await
    }

    /// Validates the cart, emits `order.requested` and clears the cart.
    ///
    /// Each item is checked against the current product snapshot; a missing
    /// product or short stock fails the whole checkout and leaves the cart
    /// as it was. Stock is not touched here.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, user_id: UserId) -> Result<OrderHandle> {
        let Some(cart) = self.carts.load(user_id.cart_id()).await? else {
            return Err(SagaError::EmptyCart);
        };
        cart.data.ensure_not_empty()?;

        let mut lines = Vec::with_capacity(cart.data.items().len());
        for item in cart.data.items() {
            let snapshot = self
                .catalog
                .snapshot(item.product_id)
                .await?
                .ok_or(SagaError::ProductNotFound(item.product_id))?;

            if snapshot.quantity < item.quantity {
                metrics::counter!("checkout_total", "outcome" => "insufficient_stock").increment(1);
                return Err(SagaError::InsufficientStock {
                    product_id: item.product_id,
                    requested: item.quantity,
                    available: snapshot.quantity,
                });
            }

            lines.push(OrderLine::new(
                item.product_id,
                item.quantity,
                snapshot.price,
                snapshot.title,
            ));
        }

        let total = OrderLine::total(&lines).ok_or(OrderError::TotalOverflow)?;
        let request = OrderRequested {
            order_id: AggregateId::new(),
            user_id,
            total,
            items: lines,
            requested_at: Utc::now(),
        };
        let event = OutgoingEvent::from_message(&request)?;
        publish_with_retry(self.bus.as_ref(), event, self.backoff.clone()).await?;

        self.clear_after_checkout(&cart.data, cart.version).await;

        metrics::counter!("checkout_total", "outcome" => "requested").increment(1);
        tracing::info!(order_id = %request.order_id, total = %request.total, "order requested");

        Ok(OrderHandle {
            order_id: request.order_id,
            total: request.total,
            item_count: request.items.len(),
        })
    }

    /// Clears the cart with the version checkout read. If the user edited
    /// the cart meanwhile the newer cart is kept.
    async fn clear_after_checkout(&self, cart: &Cart, read: Version) {
        let user_id = cart.user_id();
        match self.carts.store().update(user_id.cart_id(), read, cart.cleared()).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                tracing::info!(%user_id, "cart changed during checkout, keeping newer cart");
            }
            Err(e) => tracing::warn!(%user_id, error = %e, "could not clear cart after checkout"),
        }
    }

    /// Drops purchased products from the buyer's cart.
    #[tracing::instrument(skip(self, product_ids))]
    pub async fn remove_purchased(&self, user_id: UserId, product_ids: &[AggregateId]) -> Result<()> {
        if self.carts.load(user_id.cart_id()).await?.is_none() {
            return Ok(());
        }
        self.carts
            .execute_with_retry(user_id.cart_id(), EDIT_ATTEMPTS, |cart| Ok(cart.without(product_ids)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Handler<PaymentCompleted> for CartService {
    async fn handle(&self, message: PaymentCompleted) -> HandlerResult {
        let product_ids: Vec<AggregateId> =
            message.charged_items.iter().map(|item| item.product_id).collect();
        self.remove_purchased(message.user_id, &product_ids)
            .await
            .map_err(SagaError::into_handler_error)
    }
}

#[cfg(test)]
mod tests {
    use domain::{LineItem, ProductSnapshot};
    use event_bus::InMemoryEventBus;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use version_store::InMemoryVersionStore;

    use super::*;

    #[derive(Default)]
    struct FixedCatalog {
        products: Mutex<HashMap<AggregateId, ProductSnapshot>>,
    }

    impl FixedCatalog {
        async fn add(&self, title: &str, cents: i64, quantity: u32) -> AggregateId {
            let id = AggregateId::new();
            self.products.lock().await.insert(
                id,
                ProductSnapshot {
                    product_id: id,
                    title: title.into(),
                    price: Money::from_cents(cents),
                    quantity,
                },
            );
            id
        }
    }

    #[async_trait]
    impl ProductCatalog for FixedCatalog {
        async fn snapshot(&self, product_id: AggregateId) -> Result<Option<ProductSnapshot>> {
            Ok(self.products.lock().await.get(&product_id).cloned())
        }
    }

    fn service(catalog: Arc<FixedCatalog>) -> (CartService, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let service = CartService::new(Arc::new(InMemoryVersionStore::new("carts")), catalog, bus.clone());
        (service, bus)
    }

    #[tokio::test]
    async fn checkout_snapshots_prices_and_clears_cart() {
        let catalog = Arc::new(FixedCatalog::default());
        let p1 = catalog.add("P1", 1000, 10).await;
        let p2 = catalog.add("P2", 2000, 10).await;
        let (carts, bus) = service(catalog);
        let user = UserId::new();

        carts.set_item(user, p1, 2).await.unwrap();
        carts.set_item(user, p2, 1).await.unwrap();

        let handle = carts.checkout(user).await.unwrap();
        assert_eq!(handle.total, Money::from_cents(4000));
        assert_eq!(handle.item_count, 2);

        let published = bus.published("order.requested").await;
        assert_eq!(published.len(), 1);
        let request: OrderRequested = published[0].decode().unwrap();
        assert_eq!(request.order_id, handle.order_id);
        assert_eq!(request.total, Money::from_cents(4000));

        assert!(carts.cart(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_cart_is_refused() {
        let catalog = Arc::new(FixedCatalog::default());
        let p = catalog.add("P", 500, 1).await;
        let (carts, bus) = service(catalog);
        let user = UserId::new();

        assert!(matches!(carts.checkout(user).await, Err(SagaError::EmptyCart)));

        carts.set_item(user, p, 1).await.unwrap();
        carts.remove_item(user, p).await.unwrap();
        assert!(matches!(carts.checkout(user).await, Err(SagaError::EmptyCart)));
        assert!(bus.published("order.requested").await.is_empty());
    }

    #[tokio::test]
    async fn short_stock_leaves_cart_untouched() {
        let catalog = Arc::new(FixedCatalog::default());
        let p = catalog.add("P", 500, 1).await;
        let (carts, bus) = service(catalog);
        let user = UserId::new();
        carts.set_item(user, p, 3).await.unwrap();

        let result = carts.checkout(user).await;
        assert!(matches!(result, Err(SagaError::InsufficientStock { requested: 3, available: 1, .. })));
        assert_eq!(carts.cart(user).await.unwrap().quantity_of(p), Some(3));
        assert!(bus.published("order.requested").await.is_empty());
    }

    #[tokio::test]
    async fn total_that_does_not_fit_is_refused() {
        let catalog = Arc::new(FixedCatalog::default());
        let p = catalog.add("P", i64::MAX / 2, 10).await;
        let (carts, bus) = service(catalog);
        let user = UserId::new();
        carts.set_item(user, p, 3).await.unwrap();

        let result = carts.checkout(user).await;
        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(carts.cart(user).await.unwrap().quantity_of(p), Some(3));
        assert!(bus.published("order.requested").await.is_empty());
    }

    #[tokio::test]
    async fn unknown_product_cannot_be_added() {
        let (carts, _) = service(Arc::new(FixedCatalog::default()));
        let result = carts.set_item(UserId::new(), AggregateId::new(), 1).await;
        assert!(matches!(result, Err(SagaError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn payment_removes_only_purchased_items() {
        let catalog = Arc::new(FixedCatalog::default());
        let p1 = catalog.add("P1", 100, 10).await;
        let p2 = catalog.add("P2", 100, 10).await;
        let (carts, _) = service(catalog);
        let user = UserId::new();
        carts.set_item(user, p1, 1).await.unwrap();
        carts.set_item(user, p2, 1).await.unwrap();

        let paid = PaymentCompleted {
            order_id: AggregateId::new(),
            user_id: user,
            charged_items: vec![LineItem::new(p1, 1)],
            charge_id: "ch_1".into(),
            amount: Money::from_cents(100),
        };
        carts.handle(paid.clone()).await.unwrap();
        carts.handle(paid).await.unwrap();

        let cart = carts.cart(user).await.unwrap();
        assert_eq!(cart.quantity_of(p1), None);
        assert_eq!(cart.quantity_of(p2), Some(1));
    }
}
