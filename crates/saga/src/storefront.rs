//! Wires the four services to their stores and to the bus.

use std::sync::Arc;
use std::time::Duration;

use domain::{Cart, Order, OrderCancelled, OrderReplica, OrderRequested, Payment, PaymentCompleted, ProductSnapshot};
use event_bus::{Backoff, Consumer, EventBus, InMemoryEventBus, MessageHandler, PostgresEventBus, Typed};
use inventory::{InMemoryStockLedger, PostgresStockLedger, ProductService, StockLedger};
use projections::{OrderReplicaView, ProductReplicaView, ProjectionProcessor};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use version_store::{InMemoryVersionStore, PostgresVersionStore, VersionStore};

use crate::catalog::ReadThroughCatalog;
use crate::gateway::PaymentGateway;
use crate::{CartService, NotificationService, OrderService, PaymentService, Result};

/// Consumer group names.
pub mod groups {
    pub const INVENTORY: &str = "inventory";
    pub const ORDERS: &str = "orders";
    pub const CARTS: &str = "carts";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const CART_PRODUCTS: &str = "carts.products";
    pub const PAYMENT_ORDERS: &str = "payments.orders";
}

/// Timing knobs of the saga.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// How long an order may stay `Created` before it is cancelled.
    pub order_ttl: Duration,
    pub expiry_sweep_interval: Duration,
    pub poll_interval: Duration,
    pub gateway_timeout: Duration,
    /// How long a reserve may sit part-way before another attempt takes it over.
    pub stale_claim_after: Duration,
    /// Retry policy for bus publishes and consumer failures.
    pub backoff: Backoff,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            order_ttl: Duration::from_secs(15 * 60),
            expiry_sweep_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            gateway_timeout: Duration::from_secs(5),
            stale_claim_after: Duration::from_secs(30),
            backoff: Backoff::default(),
        }
    }
}

/// Storage for every service. Services share nothing else but the bus.
#[derive(Clone)]
pub struct Backends {
    pub bus: Arc<dyn EventBus>,
    pub ledger: Arc<dyn StockLedger>,
    pub carts: Arc<dyn VersionStore<Cart>>,
    pub orders: Arc<dyn VersionStore<Order>>,
    pub payments: Arc<dyn VersionStore<Payment>>,
    pub product_replica: Arc<dyn VersionStore<ProductSnapshot>>,
    pub order_replica: Arc<dyn VersionStore<OrderReplica>>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            bus: Arc::new(InMemoryEventBus::new()),
            ledger: Arc::new(InMemoryStockLedger::new()),
            carts: Arc::new(InMemoryVersionStore::new("carts")),
            orders: Arc::new(InMemoryVersionStore::new("orders")),
            payments: Arc::new(InMemoryVersionStore::new("payments")),
            product_replica: Arc::new(InMemoryVersionStore::new("cart_product_replicas")),
            order_replica: Arc::new(InMemoryVersionStore::new("payment_order_replicas")),
        }
    }

    /// PostgreSQL backends. The schema must already be migrated.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            bus: Arc::new(PostgresEventBus::new(pool.clone())),
            ledger: Arc::new(PostgresStockLedger::new(pool.clone())),
            carts: Arc::new(PostgresVersionStore::new(pool.clone(), "carts")),
            orders: Arc::new(PostgresVersionStore::new(pool.clone(), "orders")),
            payments: Arc::new(PostgresVersionStore::new(pool.clone(), "payments")),
            product_replica: Arc::new(PostgresVersionStore::new(pool.clone(), "cart_product_replicas")),
            order_replica: Arc::new(PostgresVersionStore::new(pool, "payment_order_replicas")),
        }
    }
}

/// The storefront's services, wired together.
#[derive(Clone)]
pub struct Storefront {
    bus: Arc<dyn EventBus>,
    products: ProductService,
    carts: CartService,
    orders: OrderService,
    payments: PaymentService,
    notifications: NotificationService,
    product_replica: ProductReplicaView,
    order_replica: OrderReplicaView,
    config: StorefrontConfig,
}

impl Storefront {
    pub fn new(backends: Backends, gateway: Arc<dyn PaymentGateway>, config: StorefrontConfig) -> Self {
        let bus = backends.bus;
        let backoff = config.backoff.clone();

        let products = ProductService::new(backends.ledger, bus.clone())
            .with_backoff(backoff.clone())
            .with_stale_claim_after(config.stale_claim_after);

        let product_replica = ProductReplicaView::new(groups::CART_PRODUCTS, backends.product_replica);
        let catalog = ReadThroughCatalog::new(product_replica.clone(), products.clone());
        let carts =
            CartService::new(backends.carts, Arc::new(catalog), bus.clone()).with_backoff(backoff.clone());

        let orders = OrderService::new(backends.orders, bus.clone(), config.order_ttl).with_backoff(backoff.clone());

        let order_replica = OrderReplicaView::new(groups::PAYMENT_ORDERS, backends.order_replica);
        let payments = PaymentService::new(
            backends.payments,
            order_replica.clone(),
            products.clone(),
            gateway,
            bus.clone(),
        )
        .with_gateway_timeout(config.gateway_timeout)
        .with_backoff(backoff);

        Self {
            bus,
            products,
            carts,
            orders,
            payments,
            notifications: NotificationService::default(),
            product_replica,
            order_replica,
            config,
        }
    }

    /// All services in memory, for tests and local runs.
    pub fn in_memory(gateway: Arc<dyn PaymentGateway>, config: StorefrontConfig) -> Self {
        Self::new(Backends::in_memory(), gateway, config)
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn products(&self) -> &ProductService {
        &self.products
    }

    pub fn carts(&self) -> &CartService {
        &self.carts
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    /// The processor driving the replica projections.
    pub fn projections(&self) -> ProjectionProcessor {
        let mut processor = ProjectionProcessor::new(self.bus.clone());
        processor.register(Arc::new(self.product_replica.clone()));
        processor.register(Arc::new(self.order_replica.clone()));
        processor
    }

    /// Empties the replicas and rebuilds them from the bus.
    pub async fn rebuild_replicas(&self) -> Result<()> {
        self.projections().rebuild_all().await?;
        Ok(())
    }

    /// One consumer per (service, topic) pair.
    pub fn consumers(&self) -> Vec<Consumer> {
        let handlers: Vec<(&str, Arc<dyn MessageHandler>)> = vec![
            (groups::INVENTORY, typed::<OrderCancelled, _>(self.products.clone())),
            (groups::INVENTORY, typed::<PaymentCompleted, _>(self.products.clone())),
            (groups::ORDERS, typed::<OrderRequested, _>(self.orders.clone())),
            (groups::ORDERS, typed::<PaymentCompleted, _>(self.orders.clone())),
            (groups::CARTS, typed::<PaymentCompleted, _>(self.carts.clone())),
            (groups::NOTIFICATIONS, typed::<PaymentCompleted, _>(self.notifications.clone())),
            (groups::NOTIFICATIONS, typed::<OrderCancelled, _>(self.notifications.clone())),
        ];

        handlers
            .into_iter()
            .map(|(group, handler)| Consumer::new(self.bus.clone(), group, handler))
            .chain(self.projections().consumers())
            .map(|consumer| {
                consumer
                    .with_poll_interval(self.config.poll_interval)
                    .with_backoff(self.config.backoff.clone())
            })
            .collect()
    }

    /// Spawns every consumer and the expiry sweeper.
    ///
    /// All tasks stop when `shutdown` turns true; join the returned handles
    /// to wait for them.
    pub fn spawn_consumers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks: Vec<JoinHandle<()>> = self
            .consumers()
            .into_iter()
            .map(|consumer| tokio::spawn(consumer.run(shutdown.clone())))
            .collect();

        tasks.push(tokio::spawn(
            self.orders
                .clone()
                .run_expiry_sweeper(self.config.expiry_sweep_interval, shutdown),
        ));

        tracing::info!(tasks = tasks.len(), "storefront consumers started");
        tasks
    }

    /// Polls every consumer until none has anything left.
    ///
    /// Returns the number of events acknowledged. Handy in tests, where it
    /// replaces the background consumer tasks.
    pub async fn drain(&self) -> Result<usize> {
        let consumers = self.consumers();
        let mut total = 0;
        loop {
            let mut round = 0;
            for consumer in &consumers {
                loop {
                    let outcome = consumer.poll_once().await?;
                    round += outcome.acknowledged;
                    if outcome.acknowledged == 0 || outcome.stalled {
                        break;
                    }
                }
            }
            if round == 0 {
                return Ok(total);
            }
            total += round;
        }
    }
}

fn typed<M, H>(handler: H) -> Arc<dyn MessageHandler>
where
    M: event_bus::Message,
    H: event_bus::Handler<M> + 'static,
{
    Arc::new(Typed::<M, H>::new(handler))
}
