use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{LineItem, Product};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use version_store::{Version, Versioned};

use crate::{LedgerError, Result};

/// Lifecycle of an order's reservation record.
///
/// ```text
/// Pending ──► Held ──┬──► Committed
///    │               └──► Released
///    └──────────────────► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Claimed by a reserve in progress. Items are recorded as they are debited.
    Pending,
    /// Every item was debited.
    Held,
    /// The order was paid; the debit is permanent.
    Committed,
    /// Compensated. A released record stays as a tombstone so a late
    /// reserve for the same order is refused.
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Held => "Held",
            ReservationStatus::Committed => "Committed",
            ReservationStatus::Released => "Released",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ReservationStatus::Pending),
            "Held" => Some(ReservationStatus::Held),
            "Committed" => Some(ReservationStatus::Committed),
            "Released" => Some(ReservationStatus::Released),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies one reserve attempt's claim on an order's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What the ledger debited for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: AggregateId,
    pub status: ReservationStatus,
    pub items: Vec<LineItem>,
    /// The reserve attempt that owns a `Pending` record.
    pub claim: Option<ClaimToken>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Succeeds only while `token` owns this record's pending claim.
    pub fn ensure_claimed_by(&self, token: ClaimToken) -> Result<()> {
        match self.status {
            ReservationStatus::Pending if self.claim == Some(token) => Ok(()),
            ReservationStatus::Released | ReservationStatus::Committed => {
                Err(LedgerError::ReservationClosed {
                    order_id: self.order_id,
                    status: self.status,
                })
            }
            ReservationStatus::Pending | ReservationStatus::Held => {
                Err(LedgerError::ClaimLost(self.order_id))
            }
        }
    }
}

/// Checks a possibly missing record against a claim token.
pub(crate) fn ensure_claim(
    order_id: AggregateId,
    record: Option<&Reservation>,
    token: ClaimToken,
) -> Result<()> {
    match record {
        Some(record) => record.ensure_claimed_by(token),
        None => Err(LedgerError::ClaimLost(order_id)),
    }
}

/// Outcome of claiming an order's reservation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// A fresh `Pending` record was created and belongs to the token.
    Claimed(ClaimToken),
    /// A record already exists.
    Existing(Reservation),
}

/// A reservation that gave its items back, with the restocked products.
#[derive(Debug, Clone)]
pub struct Released {
    pub order_id: AggregateId,
    pub items: Vec<LineItem>,
    pub products: Vec<Versioned<Product>>,
}

/// Storage of product stock and reservation records.
///
/// Every stock change is a single conditional operation and bumps the
/// product's version by one. Stock is only ever taken on behalf of an
/// order: a debit and the record of it happen together, so whatever a
/// reservation took can always be found and given back.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Adds a product at version 1.
    async fn insert_product(&self, product: Product) -> Result<Versioned<Product>>;

    /// Replaces a product if its version still equals `expected`.
    async fn update_product(&self, expected: Version, product: Product) -> Result<Versioned<Product>>;

    async fn product(&self, id: AggregateId) -> Result<Option<Versioned<Product>>>;

    async fn products(&self) -> Result<Vec<Versioned<Product>>>;

    /// Creates a `Pending` record for the order unless one exists.
    async fn claim(&self, order_id: AggregateId) -> Result<Claim>;

    /// Subtracts the item's quantity only if that much is in stock, and
    /// records the item on the order's `Pending` record in the same step.
    ///
    /// Fails with `InsufficientStock` or `ProductNotFound` without changing
    /// anything, with `ReservationClosed` if the record was released, and
    /// with `ClaimLost` if `token` no longer owns the claim.
    async fn debit(
        &self,
        order_id: AggregateId,
        token: ClaimToken,
        item: LineItem,
    ) -> Result<Versioned<Product>>;

    /// Moves the `Pending` record owned by `token` to `Held`.
    ///
    /// Fails like [`StockLedger::debit`] when the claim is gone.
    async fn hold(&self, order_id: AggregateId, token: ClaimToken) -> Result<()>;

    /// Gives back what a failed reserve recorded and deletes its `Pending`
    /// record. Does nothing unless `token` still owns the claim.
    async fn abandon(&self, order_id: AggregateId, token: ClaimToken) -> Result<Option<Released>>;

    /// Gives back what a `Pending` record untouched for `stale_after` holds
    /// and deletes it, so the order can be reserved again.
    ///
    /// Recovers stock from a reserve that stopped part-way. Yields `Some`
    /// whenever a record was removed, even one with nothing recorded.
    async fn reclaim_stale(
        &self,
        order_id: AggregateId,
        stale_after: Duration,
    ) -> Result<Option<Released>>;

    /// Releases the order's reservation and restocks what it holds, atomically.
    ///
    /// `Pending` and `Held` records give back every recorded item and yield
    /// `Some` when anything was recorded. An unknown order gets a
    /// `Released` tombstone. Released and committed records are left alone.
    async fn release(&self, order_id: AggregateId) -> Result<Option<Released>>;

    /// Moves a `Held` record to `Committed`. Returns false otherwise.
    async fn commit(&self, order_id: AggregateId) -> Result<bool>;

    async fn reservation(&self, order_id: AggregateId) -> Result<Option<Reservation>>;
}
