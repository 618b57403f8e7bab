//! Payment service: charges orders and reports completed payments.

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, UserId};
use domain::{DomainError, OrderStatus, Payment, PaymentCompleted, Repository};
use event_bus::{Backoff, EventBus, OutgoingEvent, publish_with_retry};
use inventory::ProductService;
use projections::OrderReplicaView;
use version_store::{StoreError, VersionStore};

use crate::gateway::{GatewayError, PaymentGateway};
use crate::{Result, SagaError};

#[derive(Clone)]
pub struct PaymentService {
    payments: Repository<Payment>,
    orders: OrderReplicaView,
    products: ProductService,
    gateway: Arc<dyn PaymentGateway>,
    bus: Arc<dyn EventBus>,
    gateway_timeout: Duration,
    backoff: Backoff,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn VersionStore<Payment>>,
        orders: OrderReplicaView,
        products: ProductService,
        gateway: Arc<dyn PaymentGateway>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            payments: Repository::new(store),
            orders,
            products,
            gateway,
            bus,
            gateway_timeout: Duration::from_secs(5),
            backoff: Backoff::default(),
        }
    }

    pub fn with_gateway_timeout(mut self, gateway_timeout: Duration) -> Self {
        self.gateway_timeout = gateway_timeout;
        self
    }

    /// Sets the backoff used when publishing fails transiently.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the payment recorded for an order, if it was paid.
    pub async fn payment(&self, order_id: AggregateId) -> Result<Option<Payment>> {
        Ok(self.payments.load(order_id).await?.map(|payment| payment.data))
    }

    /// Reserves the order's stock, charges the buyer and completes the order.
    ///
    /// Stock is reserved before the gateway is called and only a successful
    /// charge completes the order. After a decline the order stays `Created`
    /// and keeps its reservation until it is paid, cancelled or expires, so
    /// paying again does not reserve twice. Calling this again for a paid
    /// order returns the recorded payment without touching the gateway.
    ///
    /// A retry after `GatewayUnavailable`, including a timeout whose charge
    /// may in fact have gone through, reuses the held reservation and sends
    /// the order id as the same idempotency key, so the buyer is charged at
    /// most once.
    #[tracing::instrument(skip(self, token))]
    pub async fn charge_payment(&self, order_id: AggregateId, user_id: UserId, token: &str) -> Result<Payment> {
        let replica = self
            .orders
            .get(order_id)
            .await?
            .ok_or(SagaError::NotFound {
                entity: "Order",
                id: order_id,
            })?
            .data;
        replica.ensure_owner(user_id)?;

        if let Some(payment) = self.payment(order_id).await? {
            tracing::info!(charge_id = %payment.charge_id, "order already paid");
            return Ok(payment);
        }
        // A complete replica without a payment record means an earlier
        // attempt stopped after its charge; charging again with the same key
        // returns that charge.
        if replica.status != OrderStatus::Complete {
            replica.ensure_payable()?;
        }

        if let Err(e) = self.products.reserve(order_id, &replica.items).await {
            let e = SagaError::from(e);
            let outcome = match e {
                SagaError::InsufficientStock { .. } | SagaError::ProductNotFound(_) => "insufficient_stock",
                _ => "failed",
            };
            metrics::counter!("payments_total", "outcome" => outcome).increment(1);
            return Err(e);
        }

        let charge = tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.charge(replica.total, token, order_id),
        )
        .await;
        let charge_id = match charge {
            Ok(Ok(charge_id)) => charge_id,
            Ok(Err(GatewayError::Declined(reason))) => {
                tracing::info!(%reason, "payment declined");
                metrics::counter!("payments_total", "outcome" => "declined").increment(1);
                return Err(SagaError::GatewayDeclined(reason));
            }
            Ok(Err(GatewayError::Unavailable(reason))) => {
                tracing::warn!(%reason, "payment gateway failed");
                metrics::counter!("payments_total", "outcome" => "unavailable").increment(1);
                return Err(SagaError::GatewayUnavailable(reason));
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.gateway_timeout.as_millis() as u64, "payment gateway timed out");
                metrics::counter!("payments_total", "outcome" => "unavailable").increment(1);
                return Err(SagaError::GatewayUnavailable(format!(
                    "no answer within {:?}",
                    self.gateway_timeout
                )));
            }
        };

        if let Err(e) = self.orders.mark_complete(order_id).await {
            let e = SagaError::from(e);
            if let SagaError::OrderClosed { .. } = e {
                tracing::error!(%charge_id, "order cancelled while being charged, charge needs a refund");
            }
            return Err(e);
        }

        let payment = Payment::new(order_id, user_id, charge_id, replica.total);
        let payment = match self.payments.create(payment).await {
            Ok(saved) => saved.data,
            Err(DomainError::Store(StoreError::AlreadyExists(_))) => {
                self.payments.load_required(order_id).await?.data
            }
            Err(e) => return Err(e.into()),
        };

        let message = PaymentCompleted {
            order_id,
            user_id,
            charged_items: replica.items,
            charge_id: payment.charge_id.clone(),
            amount: payment.amount,
        };
        let event = OutgoingEvent::from_message(&message)?;
        publish_with_retry(self.bus.as_ref(), event, self.backoff.clone()).await?;

        metrics::counter!("payments_total", "outcome" => "completed").increment(1);
        tracing::info!(charge_id = %payment.charge_id, amount = %payment.amount, "payment completed");
        Ok(payment)
    }
}
