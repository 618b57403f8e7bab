//! Product service: owner edits, reservations and compensating restores.

use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use domain::{Aggregate, LineItem, Money, Product, ProductUpdated};
use event_bus::{Backoff, EventBus, OutgoingEvent, publish_with_retry};
use version_store::{Version, Versioned};

use crate::{Claim, ClaimToken, LedgerError, Released, ReservationStatus, Result, StockLedger};

/// Outcome of a successful reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Every item was debited now.
    Reserved,
    /// The order already holds its stock from an earlier reserve.
    AlreadyHeld,
}

/// Outcome of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The listed items were put back into stock.
    Restored(Vec<LineItem>),
    /// Nothing was held for the order.
    NothingHeld,
}

/// The inventory side of the storefront.
///
/// Owns the ledger and announces every stock change on `product.updated`
/// with the product's new absolute state.
#[derive(Clone)]
pub struct ProductService {
    ledger: Arc<dyn StockLedger>,
    bus: Arc<dyn EventBus>,
    backoff: Backoff,
    stale_claim_after: Duration,
}

impl ProductService {
    pub fn new(ledger: Arc<dyn StockLedger>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            ledger,
            bus,
            backoff: Backoff::default(),
            stale_claim_after: Duration::from_secs(30),
        }
    }

    /// Sets how long a `Pending` reservation may go untouched before a new
    /// reserve for the same order gives its stock back and starts over.
    pub fn with_stale_claim_after(mut self, stale_claim_after: Duration) -> Self {
        self.stale_claim_after = stale_claim_after;
        self
    }

    /// Sets the backoff used when publishing fails transiently.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn StockLedger> {
        &self.ledger
    }

    #[tracing::instrument(skip(self, title))]
    pub async fn create_product(
        &self,
        title: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Result<Versioned<Product>> {
        let product = Product::new(AggregateId::new(), title, price, quantity)?;
        let saved = self.ledger.insert_product(product).await?;

        tracing::info!(product_id = %saved.id, quantity, "product created");
        self.announce(&saved).await?;
        Ok(saved)
    }

    /// Replaces a product's fields, checked against the version the owner read.
    #[tracing::instrument(skip(self, title))]
    pub async fn update_product(
        &self,
        id: AggregateId,
        expected_version: Version,
        title: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Result<Versioned<Product>> {
        let current = self
            .ledger
            .product(id)
            .await?
            .ok_or(LedgerError::ProductNotFound(id))?;
        let edited = current.data.edit(title, price, quantity)?;
        let saved = self.ledger.update_product(expected_version, edited).await?;

        tracing::info!(product_id = %id, version = %saved.version, "product updated");
        self.announce(&saved).await?;
        Ok(saved)
    }

    pub async fn product(&self, id: AggregateId) -> Result<Option<Versioned<Product>>> {
        self.ledger.product(id).await
    }

    /// Reserves every item for the order, or nothing.
    ///
    /// Items are debited one by one with a conditional decrement that is
    /// recorded on the order's reservation. If item *k* fails, items
    /// `1..k-1` are given back before the error is returned. Reserving
    /// again for an order that already holds its stock succeeds without
    /// debiting twice. A `Pending` reservation older than the stale-claim
    /// window is given back and taken over.
    #[tracing::instrument(skip(self, items), fields(order_id = %order_id, items = items.len()))]
    pub async fn reserve(&self, order_id: AggregateId, items: &[LineItem]) -> Result<ReserveOutcome> {
        let mut took_over = false;
        let token = loop {
            match self.ledger.claim(order_id).await? {
                Claim::Claimed(token) => break token,
                Claim::Existing(existing) => match existing.status {
                    ReservationStatus::Held | ReservationStatus::Committed => {
                        tracing::info!("reservation already held");
                        return Ok(ReserveOutcome::AlreadyHeld);
                    }
                    ReservationStatus::Pending => {
                        if took_over || !self.take_over_stale(order_id).await? {
                            return Err(LedgerError::ReservationInProgress(order_id));
                        }
                        took_over = true;
                    }
                    status @ ReservationStatus::Released => {
                        return Err(LedgerError::ReservationClosed { order_id, status });
                    }
                },
            }
        };

        let mut debited = Vec::with_capacity(items.len());
        for item in items {
            match self.ledger.debit(order_id, token, *item).await {
                Ok(product) => debited.push(product),
                Err(e) => return Err(self.fail_reserve(order_id, token, e).await),
            }
        }

        if let Err(e) = self.ledger.hold(order_id, token).await {
            return Err(self.fail_reserve(order_id, token, e).await);
        }

        for product in &debited {
            self.announce(product).await?;
        }

        metrics::counter!("reservations_total", "outcome" => "reserved").increment(1);
        tracing::info!("stock reserved");
        Ok(ReserveOutcome::Reserved)
    }

    /// Puts back what the order's reservation holds. Safe to call repeatedly.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self, order_id: AggregateId) -> Result<RestoreOutcome> {
        let Some(released) = self.ledger.release(order_id).await? else {
            tracing::debug!("nothing held for order");
            return Ok(RestoreOutcome::NothingHeld);
        };

        for product in &released.products {
            self.announce(product).await?;
        }

        metrics::counter!("reservations_total", "outcome" => "restored").increment(1);
        tracing::info!(items = released.items.len(), "stock restored");
        Ok(RestoreOutcome::Restored(released.items))
    }

    /// Makes the order's debit permanent.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, order_id: AggregateId) -> Result<bool> {
        let committed = self.ledger.commit(order_id).await?;
        if !committed {
            match self.ledger.reservation(order_id).await? {
                Some(r) if r.status == ReservationStatus::Committed => {}
                Some(r) => tracing::warn!(status = %r.status, "paid order has no held reservation"),
                None => tracing::warn!("paid order has no reservation"),
            }
        }
        Ok(committed)
    }

    /// Gives back what a failed reserve took, unless someone else already did.
    async fn fail_reserve(&self, order_id: AggregateId, token: ClaimToken, error: LedgerError) -> LedgerError {
        if matches!(error, LedgerError::ReservationClosed { .. }) {
            // The cancellation that released the record gave the debits back.
            tracing::warn!("order cancelled during reservation");
            metrics::counter!("reservations_total", "outcome" => "cancelled").increment(1);
            return error;
        }
        if matches!(error, LedgerError::ClaimLost(_)) {
            tracing::warn!("reservation taken over by a newer attempt");
            metrics::counter!("reservations_total", "outcome" => "taken_over").increment(1);
            return error;
        }

        tracing::info!(error = %error, "reservation failed, rolling back");
        metrics::counter!("reservations_total", "outcome" => "rejected").increment(1);
        match self.ledger.abandon(order_id, token).await {
            Ok(Some(released)) => self.announce_released(&released).await,
            Ok(None) => {}
            // The record stays Pending with what it took, for a stale takeover or a cancellation.
            Err(e) => tracing::error!(error = %e, "rollback failed, stock stays reserved"),
        }
        error
    }

    async fn take_over_stale(&self, order_id: AggregateId) -> Result<bool> {
        let Some(released) = self.ledger.reclaim_stale(order_id, self.stale_claim_after).await? else {
            return Ok(false);
        };

        tracing::warn!(items = released.items.len(), "stale reservation given back");
        metrics::counter!("reservations_total", "outcome" => "reclaimed").increment(1);
        self.announce_released(&released).await;
        Ok(true)
    }

    async fn announce_released(&self, released: &Released) {
        for product in &released.products {
            if let Err(e) = self.announce(product).await {
                tracing::warn!(product_id = %product.id, error = %e, "could not announce restock");
            }
        }
    }

    async fn announce(&self, product: &Versioned<Product>) -> Result<()> {
        let message = ProductUpdated {
            product_id: product.data.id(),
            title: product.data.title().to_string(),
            price: product.data.price(),
            quantity: product.data.quantity(),
            version: product.version,
        };
        let event = OutgoingEvent::from_message(&message)?;
        publish_with_retry(self.bus.as_ref(), event, self.backoff.clone()).await?;
        Ok(())
    }
}
