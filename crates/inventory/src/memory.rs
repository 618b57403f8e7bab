use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use domain::{Aggregate, LineItem, Product};
use tokio::sync::Mutex;
use version_store::{Version, Versioned};

use crate::ledger::ensure_claim;
use crate::{
    Claim, ClaimToken, LedgerError, Released, Reservation, ReservationStatus, Result, StockLedger,
};

#[derive(Default)]
struct LedgerState {
    products: HashMap<AggregateId, Versioned<Product>>,
    reservations: HashMap<AggregateId, Reservation>,
}

impl LedgerState {
    fn apply(
        &mut self,
        product_id: AggregateId,
        change: impl FnOnce(&Product) -> std::result::Result<Product, domain::ProductError>,
    ) -> Result<Versioned<Product>> {
        let current = self
            .products
            .get(&product_id)
            .ok_or(LedgerError::ProductNotFound(product_id))?;

        let next = Versioned::new(product_id, current.version.next(), change(&current.data)?);
        self.products.insert(product_id, next.clone());
        Ok(next)
    }

    fn give_back(&mut self, order_id: AggregateId, items: Vec<LineItem>) -> Result<Released> {
        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            products.push(self.apply(item.product_id, |p| Ok(p.credit(item.quantity)))?);
        }

        Ok(Released {
            order_id,
            items,
            products,
        })
    }
}

/// In-memory ledger for tests and single-process deployments.
///
/// One lock guards products and reservations, so a debit and its record,
/// or a release and its restock, happen in a single step.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryStockLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn insert_product(&self, product: Product) -> Result<Versioned<Product>> {
        let mut state = self.state.lock().await;
        let id = product.id();
        if state.products.contains_key(&id) {
            return Err(LedgerError::ProductExists(id));
        }

        let record = Versioned::new(id, Version::first(), product);
        state.products.insert(id, record.clone());
        Ok(record)
    }

    async fn update_product(&self, expected: Version, product: Product) -> Result<Versioned<Product>> {
        let mut state = self.state.lock().await;
        let id = product.id();
        let current = state
            .products
            .get(&id)
            .ok_or(LedgerError::ProductNotFound(id))?;

        if current.version != expected {
            return Err(LedgerError::ConcurrencyConflict {
                product_id: id,
                expected,
                actual: current.version,
            });
        }

        let record = Versioned::new(id, expected.next(), product);
        state.products.insert(id, record.clone());
        Ok(record)
    }

    async fn product(&self, id: AggregateId) -> Result<Option<Versioned<Product>>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn products(&self) -> Result<Vec<Versioned<Product>>> {
        let state = self.state.lock().await;
        let mut products: Vec<_> = state.products.values().cloned().collect();
        products.sort_by_key(|p| p.id);
        Ok(products)
    }

    async fn claim(&self, order_id: AggregateId) -> Result<Claim> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.reservations.get(&order_id) {
            return Ok(Claim::Existing(existing.clone()));
        }

        let token = ClaimToken::new();
        state.reservations.insert(
            order_id,
            Reservation {
                order_id,
                status: ReservationStatus::Pending,
                items: Vec::new(),
                claim: Some(token),
                updated_at: Utc::now(),
            },
        );
        Ok(Claim::Claimed(token))
    }

    async fn debit(
        &self,
        order_id: AggregateId,
        token: ClaimToken,
        item: LineItem,
    ) -> Result<Versioned<Product>> {
        let mut state = self.state.lock().await;
        ensure_claim(order_id, state.reservations.get(&order_id), token)?;

        let product = state.apply(item.product_id, |p| p.debit(item.quantity))?;
        if let Some(reservation) = state.reservations.get_mut(&order_id) {
            reservation.items.push(item);
            reservation.updated_at = Utc::now();
        }
        Ok(product)
    }

    async fn hold(&self, order_id: AggregateId, token: ClaimToken) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure_claim(order_id, state.reservations.get(&order_id), token)?;

        if let Some(reservation) = state.reservations.get_mut(&order_id) {
            reservation.status = ReservationStatus::Held;
            reservation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn abandon(&self, order_id: AggregateId, token: ClaimToken) -> Result<Option<Released>> {
        let mut state = self.state.lock().await;
        if ensure_claim(order_id, state.reservations.get(&order_id), token).is_err() {
            return Ok(None);
        }

        let items = state
            .reservations
            .remove(&order_id)
            .map(|r| r.items)
            .unwrap_or_default();
        state.give_back(order_id, items).map(Some)
    }

    async fn reclaim_stale(
        &self,
        order_id: AggregateId,
        stale_after: Duration,
    ) -> Result<Option<Released>> {
        let mut state = self.state.lock().await;
        let stale = state.reservations.get(&order_id).is_some_and(|r| {
            r.status == ReservationStatus::Pending
                && (Utc::now() - r.updated_at)
                    .to_std()
                    .is_ok_and(|age| age >= stale_after)
        });
        if !stale {
            return Ok(None);
        }

        let items = state
            .reservations
            .remove(&order_id)
            .map(|r| r.items)
            .unwrap_or_default();
        state.give_back(order_id, items).map(Some)
    }

    async fn release(&self, order_id: AggregateId) -> Result<Option<Released>> {
        let mut state = self.state.lock().await;

        let Some(reservation) = state.reservations.get_mut(&order_id) else {
            state.reservations.insert(
                order_id,
                Reservation {
                    order_id,
                    status: ReservationStatus::Released,
                    items: Vec::new(),
                    claim: None,
                    updated_at: Utc::now(),
                },
            );
            return Ok(None);
        };

        match reservation.status {
            ReservationStatus::Pending | ReservationStatus::Held => {
                reservation.status = ReservationStatus::Released;
                reservation.claim = None;
                reservation.updated_at = Utc::now();
                let items = reservation.items.clone();
                let released = state.give_back(order_id, items)?;
                Ok((!released.items.is_empty()).then_some(released))
            }
            ReservationStatus::Committed | ReservationStatus::Released => Ok(None),
        }
    }

    async fn commit(&self, order_id: AggregateId) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.reservations.get_mut(&order_id) {
            Some(reservation) if reservation.status == ReservationStatus::Held => {
                reservation.status = ReservationStatus::Committed;
                reservation.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reservation(&self, order_id: AggregateId) -> Result<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use domain::Money;

    use super::*;

    async fn ledger_with(quantity: u32) -> (InMemoryStockLedger, AggregateId) {
        let ledger = InMemoryStockLedger::new();
        let product =
            Product::new(AggregateId::new(), "Widget", Money::from_cents(1000), quantity).unwrap();
        let id = product.id();
        ledger.insert_product(product).await.unwrap();
        (ledger, id)
    }

    async fn claim(ledger: &InMemoryStockLedger, order_id: AggregateId) -> ClaimToken {
        match ledger.claim(order_id).await.unwrap() {
            Claim::Claimed(token) => token,
            Claim::Existing(r) => panic!("order already has a {} reservation", r.status),
        }
    }

    #[tokio::test]
    async fn debit_is_conditional() {
        let (ledger, id) = ledger_with(5).await;
        let order_id = AggregateId::new();
        let token = claim(&ledger, order_id).await;

        let after = ledger.debit(order_id, token, LineItem::new(id, 3)).await.unwrap();
        assert_eq!(after.data.quantity(), 2);
        assert_eq!(after.version, Version::new(2));

        let err = ledger
            .debit(order_id, token, LineItem::new(id, 3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock { requested: 3, available: 2, .. }
        ));

        let unchanged = ledger.product(id).await.unwrap().unwrap();
        assert_eq!(unchanged.data.quantity(), 2);
        assert_eq!(unchanged.version, Version::new(2));

        let record = ledger.reservation(order_id).await.unwrap().unwrap();
        assert_eq!(record.items, vec![LineItem::new(id, 3)]);
    }

    #[tokio::test]
    async fn debit_missing_product() {
        let ledger = InMemoryStockLedger::new();
        let order_id = AggregateId::new();
        let token = claim(&ledger, order_id).await;

        let err = ledger
            .debit(order_id, token, LineItem::new(AggregateId::new(), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ProductNotFound(_)));
        assert!(ledger.reservation(order_id).await.unwrap().unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn debit_needs_the_current_claim() {
        let (ledger, id) = ledger_with(5).await;
        let order_id = AggregateId::new();
        claim(&ledger, order_id).await;

        let err = ledger
            .debit(order_id, ClaimToken::new(), LineItem::new(id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ClaimLost(_)));

        let err = ledger
            .debit(AggregateId::new(), ClaimToken::new(), LineItem::new(id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ClaimLost(_)));
        assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 5);
    }

    #[tokio::test]
    async fn update_product_checks_version() {
        let (ledger, id) = ledger_with(5).await;
        let current = ledger.product(id).await.unwrap().unwrap();
        let edited = current.data.edit("Gadget", Money::from_cents(1), 9).unwrap();

        ledger
            .update_product(Version::first(), edited.clone())
            .await
            .unwrap();
        let err = ledger
            .update_product(Version::first(), edited)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn release_of_held_restocks_once() {
        let (ledger, id) = ledger_with(10).await;
        let order_id = AggregateId::new();

        let token = claim(&ledger, order_id).await;
        ledger.debit(order_id, token, LineItem::new(id, 4)).await.unwrap();
        ledger.hold(order_id, token).await.unwrap();

        let released = ledger.release(order_id).await.unwrap().unwrap();
        assert_eq!(released.products[0].data.quantity(), 10);

        assert!(ledger.release(order_id).await.unwrap().is_none());
        assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 10);
    }

    #[tokio::test]
    async fn release_during_reserve_gives_back_the_debits_and_blocks_the_hold() {
        let (ledger, id) = ledger_with(10).await;
        let order_id = AggregateId::new();

        let token = claim(&ledger, order_id).await;
        ledger.debit(order_id, token, LineItem::new(id, 3)).await.unwrap();

        let released = ledger.release(order_id).await.unwrap().unwrap();
        assert_eq!(released.items, vec![LineItem::new(id, 3)]);
        assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 10);

        assert!(matches!(
            ledger.debit(order_id, token, LineItem::new(id, 1)).await,
            Err(LedgerError::ReservationClosed { .. })
        ));
        assert!(matches!(
            ledger.hold(order_id, token).await,
            Err(LedgerError::ReservationClosed { .. })
        ));

        let record = ledger.reservation(order_id).await.unwrap().unwrap();
        assert_eq!(record.status, ReservationStatus::Released);
    }

    #[tokio::test]
    async fn release_of_unknown_order_leaves_tombstone() {
        let ledger = InMemoryStockLedger::new();
        let order_id = AggregateId::new();

        assert!(ledger.release(order_id).await.unwrap().is_none());
        assert!(matches!(
            ledger.claim(order_id).await.unwrap(),
            Claim::Existing(Reservation { status: ReservationStatus::Released, .. })
        ));
    }

    #[tokio::test]
    async fn committed_reservation_is_not_released() {
        let (ledger, id) = ledger_with(10).await;
        let order_id = AggregateId::new();

        let token = claim(&ledger, order_id).await;
        ledger.debit(order_id, token, LineItem::new(id, 2)).await.unwrap();
        ledger.hold(order_id, token).await.unwrap();

        assert!(ledger.commit(order_id).await.unwrap());
        assert!(!ledger.commit(order_id).await.unwrap());
        assert!(ledger.release(order_id).await.unwrap().is_none());
        assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 8);
    }

    #[tokio::test]
    async fn abandon_gives_back_and_frees_the_order() {
        let (ledger, id) = ledger_with(10).await;
        let order_id = AggregateId::new();

        let token = claim(&ledger, order_id).await;
        ledger.debit(order_id, token, LineItem::new(id, 6)).await.unwrap();

        assert!(ledger.abandon(order_id, ClaimToken::new()).await.unwrap().is_none());
        let released = ledger.abandon(order_id, token).await.unwrap().unwrap();
        assert_eq!(released.products[0].data.quantity(), 10);

        assert!(ledger.reservation(order_id).await.unwrap().is_none());
        assert!(matches!(ledger.claim(order_id).await.unwrap(), Claim::Claimed(_)));
    }

    #[tokio::test]
    async fn stale_pending_claim_is_reclaimed() {
        let (ledger, id) = ledger_with(10).await;
        let order_id = AggregateId::new();

        // A reserve that debited one item and never came back.
        let token = claim(&ledger, order_id).await;
        ledger.debit(order_id, token, LineItem::new(id, 7)).await.unwrap();

        assert!(
            ledger
                .reclaim_stale(order_id, Duration::from_secs(3600))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 3);

        let released = ledger.reclaim_stale(order_id, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(released.items, vec![LineItem::new(id, 7)]);
        assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 10);

        // The stopped attempt can no longer touch the order.
        assert!(matches!(
            ledger.hold(order_id, token).await,
            Err(LedgerError::ClaimLost(_))
        ));
    }

    #[tokio::test]
    async fn held_reservation_is_never_stale() {
        let (ledger, id) = ledger_with(10).await;
        let order_id = AggregateId::new();

        let token = claim(&ledger, order_id).await;
        ledger.debit(order_id, token, LineItem::new(id, 2)).await.unwrap();
        ledger.hold(order_id, token).await.unwrap();

        assert!(ledger.reclaim_stale(order_id, Duration::ZERO).await.unwrap().is_none());
        assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 8);
    }
}
