use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, ProjectionOutcome, Result, StoreError, Version, Versioned, store::VersionStore,
};

/// Runs the workspace database migrations against the pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// PostgreSQL-backed version store.
///
/// All collections share the `documents` table; the state is stored as JSONB.
/// Updates are a single `UPDATE ... WHERE version = $expected` statement.
pub struct PostgresVersionStore<T> {
    pool: PgPool,
    collection: String,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for PostgresVersionStore<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            collection: self.collection.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> PostgresVersionStore<T> {
    /// Creates a store for the named collection.
    pub fn new(pool: PgPool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
            _phantom: PhantomData,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn current_version(&self, id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(&self.collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(version.map(Version::new))
    }
}

impl<T: DeserializeOwned> PostgresVersionStore<T> {
    fn row_to_record(row: PgRow) -> Result<Versioned<T>> {
        let data: serde_json::Value = row.try_get("data")?;
        Ok(Versioned {
            id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            data: serde_json::from_value(data)?,
        })
    }
}

#[async_trait]
impl<T> VersionStore<T> for PostgresVersionStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn insert(&self, id: AggregateId, data: T) -> Result<Versioned<T>> {
        let json = serde_json::to_value(&data)?;

        let updated_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO documents (collection, id, version, data, updated_at)
            VALUES ($1, $2, 1, $3, NOW())
            ON CONFLICT (collection, id) DO NOTHING
            RETURNING updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(id.as_uuid())
        .bind(json)
        .fetch_optional(&self.pool)
        .await?;

        match updated_at {
            Some(updated_at) => Ok(Versioned {
                id,
                version: Version::first(),
                updated_at,
                data,
            }),
            None => Err(StoreError::AlreadyExists(id)),
        }
    }

    async fn get(&self, id: AggregateId) -> Result<Option<Versioned<T>>> {
        let row = sqlx::query(
            r#"
            SELECT id, version, data, updated_at
            FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(&self.collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn update(&self, id: AggregateId, expected: Version, data: T) -> Result<Versioned<T>> {
        let json = serde_json::to_value(&data)?;

        let row = sqlx::query(
            r#"
            UPDATE documents
            SET data = $4, version = version + 1, updated_at = NOW()
            WHERE collection = $1 AND id = $2 AND version = $3
            RETURNING version, updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(id.as_uuid())
        .bind(expected.as_i64())
        .bind(json)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Versioned {
                id,
                version: Version::new(row.try_get("version")?),
                updated_at: row.try_get("updated_at")?,
                data,
            });
        }

        // Nothing matched: either the row is gone or the version moved on.
        match self.current_version(id).await? {
            None => Err(StoreError::NotFound(id)),
            Some(actual) => {
                metrics::counter!("version_store_conflicts_total", "collection" => self.collection.clone())
                    .increment(1);
                Err(StoreError::ConcurrencyConflict {
                    aggregate_id: id,
                    expected,
                    actual,
                })
            }
        }
    }

    async fn project(
        &self,
        id: AggregateId,
        source_version: Version,
        data: T,
    ) -> Result<ProjectionOutcome> {
        let json = serde_json::to_value(&data)?;

        let applied: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO documents (collection, id, version, data, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (collection, id) DO UPDATE SET
                version = EXCLUDED.version,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            WHERE documents.version < EXCLUDED.version
            RETURNING version
            "#,
        )
        .bind(&self.collection)
        .bind(id.as_uuid())
        .bind(source_version.as_i64())
        .bind(json)
        .fetch_optional(&self.pool)
        .await?;

        match applied {
            Some(version) => Ok(ProjectionOutcome::Applied(Version::new(version))),
            None => Ok(ProjectionOutcome::Stale {
                held: self
                    .current_version(id)
                    .await?
                    .unwrap_or(Version::initial()),
            }),
        }
    }

    async fn list(&self) -> Result<Vec<Versioned<T>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, data, updated_at
            FROM documents
            WHERE collection = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE collection = $1")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
