use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{Aggregate, LineItem, Money, Product};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;
use version_store::{Version, Versioned};

use crate::ledger::ensure_claim;
use crate::{
    Claim, ClaimToken, LedgerError, Released, Reservation, ReservationStatus, Result, StockLedger,
};

const PRODUCT_COLUMNS: &str = "id, title, price_cents, quantity, version, updated_at";
const RESERVATION_COLUMNS: &str = "order_id, status, items, claim_id, updated_at";

// Postgres intervals top out far below `Duration::MAX`.
const MAX_STALE_AFTER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// PostgreSQL-backed ledger over the `products` and `reservations` tables.
///
/// Stock changes are single `UPDATE ... WHERE quantity >= $n` statements;
/// the `quantity >= 0` check constraint backs the invariant up. A debit
/// locks the order's reservation row first and records the item in the
/// same transaction.
#[derive(Clone)]
pub struct PostgresStockLedger {
    pool: PgPool,
}

impl PostgresStockLedger {
    /// Creates a new ledger. Run the workspace migrations first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_product(row: PgRow) -> Result<Versioned<Product>> {
        let id = AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let quantity: i64 = row.try_get("quantity")?;
        let quantity =
            u32::try_from(quantity).map_err(|e| LedgerError::Database(sqlx::Error::Decode(Box::new(e))))?;

        let product = Product::new(
            id,
            row.try_get::<String, _>("title")?,
            Money::from_cents(row.try_get("price_cents")?),
            quantity,
        )?;

        Ok(Versioned {
            id,
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get("updated_at")?,
            data: product,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let status: String = row.try_get("status")?;
        let status = ReservationStatus::parse(&status).ok_or_else(|| {
            LedgerError::Database(sqlx::Error::Decode(
                format!("unknown reservation status {status:?}").into(),
            ))
        })?;
        let items: serde_json::Value = row.try_get("items")?;
        let claim: Option<Uuid> = row.try_get("claim_id")?;

        Ok(Reservation {
            order_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            status,
            items: serde_json::from_value(items)?,
            claim: claim.map(ClaimToken::from_uuid),
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn lock_reservation(
        tx: &mut Transaction<'_, Postgres>,
        order_id: AggregateId,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn give_back_in(
        tx: &mut Transaction<'_, Postgres>,
        order_id: AggregateId,
        items: Vec<LineItem>,
    ) -> Result<Released> {
        let mut products = Vec::with_capacity(items.len());
        for item in &items {
            products.push(Self::credit_in(tx, item.product_id, item.quantity).await?);
        }

        Ok(Released {
            order_id,
            items,
            products,
        })
    }

    async fn debit_in(
        tx: &mut Transaction<'_, Postgres>,
        item: LineItem,
    ) -> Result<Versioned<Product>> {
        if item.quantity == 0 {
            return Err(domain::ProductError::InvalidQuantity.into());
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET quantity = quantity - $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND quantity >= $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(item.product_id.as_uuid())
        .bind(i64::from(item.quantity))
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = row {
            return Self::row_to_product(row);
        }

        let available: Option<i64> = sqlx::query_scalar("SELECT quantity FROM products WHERE id = $1")
            .bind(item.product_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?;

        match available {
            None => Err(LedgerError::ProductNotFound(item.product_id)),
            Some(available) => Err(LedgerError::InsufficientStock {
                product_id: item.product_id,
                requested: item.quantity,
                available: u32::try_from(available).unwrap_or(0),
            }),
        }
    }

    async fn current_version(&self, id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.map(Version::new))
    }

    async fn credit_in(
        tx: &mut Transaction<'_, Postgres>,
        product_id: AggregateId,
        quantity: u32,
    ) -> Result<Versioned<Product>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET quantity = quantity + $2, version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::ProductNotFound(product_id))?;

        Self::row_to_product(row)
    }
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    async fn insert_product(&self, product: Product) -> Result<Versioned<Product>> {
        let id = product.id();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (id, title, price_cents, quantity, version, updated_at)
            VALUES ($1, $2, $3, $4, 1, NOW())
            ON CONFLICT (id) DO NOTHING
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(product.title())
        .bind(product.price().cents())
        .bind(i64::from(product.quantity()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::ProductExists(id))?;

        Self::row_to_product(row)
    }

    async fn update_product(&self, expected: Version, product: Product) -> Result<Versioned<Product>> {
        let id = product.id();
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET title = $3, price_cents = $4, quantity = $5, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(expected.as_i64())
        .bind(product.title())
        .bind(product.price().cents())
        .bind(i64::from(product.quantity()))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_product(row);
        }

        match self.current_version(id).await? {
            None => Err(LedgerError::ProductNotFound(id)),
            Some(actual) => Err(LedgerError::ConcurrencyConflict {
                product_id: id,
                expected,
                actual,
            }),
        }
    }

    async fn product(&self, id: AggregateId) -> Result<Option<Versioned<Product>>> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn products(&self) -> Result<Vec<Versioned<Product>>> {
        let rows = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn claim(&self, order_id: AggregateId) -> Result<Claim> {
        let token = ClaimToken::new();
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO reservations (order_id, status, items, claim_id, updated_at)
            VALUES ($1, 'Pending', '[]'::jsonb, $2, NOW())
            ON CONFLICT (order_id) DO NOTHING
            RETURNING order_id
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(token.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(Claim::Claimed(token));
        }

        match self.reservation(order_id).await? {
            Some(existing) => Ok(Claim::Existing(existing)),
            // Abandoned between the insert and the read; the caller may claim again.
            None => Err(LedgerError::ReservationInProgress(order_id)),
        }
    }

    async fn debit(
        &self,
        order_id: AggregateId,
        token: ClaimToken,
        item: LineItem,
    ) -> Result<Versioned<Product>> {
        let mut tx = self.pool.begin().await?;
        let record = Self::lock_reservation(&mut tx, order_id).await?;
        ensure_claim(order_id, record.as_ref(), token)?;

        let product = Self::debit_in(&mut tx, item).await?;

        sqlx::query(
            r#"
            UPDATE reservations
            SET items = items || $2, updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(serde_json::to_value([item])?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(product)
    }

    async fn hold(&self, order_id: AggregateId, token: ClaimToken) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let record = Self::lock_reservation(&mut tx, order_id).await?;
        ensure_claim(order_id, record.as_ref(), token)?;

        sqlx::query(
            "UPDATE reservations SET status = 'Held', updated_at = NOW() WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn abandon(&self, order_id: AggregateId, token: ClaimToken) -> Result<Option<Released>> {
        let mut tx = self.pool.begin().await?;
        let Some(record) = Self::lock_reservation(&mut tx, order_id).await? else {
            return Ok(None);
        };
        if record.ensure_claimed_by(token).is_err() {
            return Ok(None);
        }

        sqlx::query("DELETE FROM reservations WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        let released = Self::give_back_in(&mut tx, order_id, record.items).await?;

        tx.commit().await?;
        Ok(Some(released))
    }

    async fn reclaim_stale(
        &self,
        order_id: AggregateId,
        stale_after: Duration,
    ) -> Result<Option<Released>> {
        let stale_after_secs = stale_after.min(MAX_STALE_AFTER).as_secs_f64();

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE order_id = $1
              AND status = 'Pending'
              AND updated_at <= NOW() - make_interval(secs => $2)
            FOR UPDATE
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(stale_after_secs)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record = Self::row_to_reservation(row)?;

        sqlx::query("DELETE FROM reservations WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        let released = Self::give_back_in(&mut tx, order_id, record.items).await?;

        tx.commit().await?;
        Ok(Some(released))
    }

    async fn release(&self, order_id: AggregateId) -> Result<Option<Released>> {
        let mut tx = self.pool.begin().await?;

        let tombstone: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO reservations (order_id, status, items, updated_at)
            VALUES ($1, 'Released', '[]'::jsonb, NOW())
            ON CONFLICT (order_id) DO NOTHING
            RETURNING order_id
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        if tombstone.is_some() {
            tx.commit().await?;
            return Ok(None);
        }

        let Some(reservation) = Self::lock_reservation(&mut tx, order_id).await? else {
            tx.commit().await?;
            return Ok(None);
        };

        if !matches!(
            reservation.status,
            ReservationStatus::Pending | ReservationStatus::Held
        ) {
            tx.commit().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'Released', claim_id = NULL, updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        let released = Self::give_back_in(&mut tx, order_id, reservation.items).await?;
        tx.commit().await?;
        Ok((!released.items.is_empty()).then_some(released))
    }

    async fn commit(&self, order_id: AggregateId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'Committed', updated_at = NOW()
            WHERE order_id = $1 AND status = 'Held'
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reservation(&self, order_id: AggregateId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }
}
