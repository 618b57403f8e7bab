use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventEnvelope, EventId, Offset, OutgoingEvent, Result,
    bus::{EventBus, EventStream},
};

const REPLAY_PAGE: i64 = 500;

/// PostgreSQL-backed bus.
///
/// Topics live in `bus_events`, cursors in `consumer_offsets`. Offsets are
/// assigned under a per-topic advisory lock so concurrent publishers never
/// interleave or skip offsets.
#[derive(Clone)]
pub struct PostgresEventBus {
    pool: PgPool,
}

impl PostgresEventBus {
    /// Creates a new PostgreSQL bus. Run the workspace migrations first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            topic: row.try_get("topic")?,
            offset: Offset::new(row.try_get("offset")?),
            key: row.try_get("key")?,
            event_type: row.try_get("event_type")?,
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    async fn page(pool: &PgPool, topic: &str, after: Offset) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT topic, "offset", event_id, event_type, key, payload, metadata, timestamp
            FROM bus_events
            WHERE topic = $1 AND "offset" > $2
            ORDER BY "offset" ASC
            LIMIT $3
            "#,
        )
        .bind(topic)
        .bind(after.as_i64())
        .bind(REPLAY_PAGE)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl EventBus for PostgresEventBus {
    async fn publish(&self, event: OutgoingEvent) -> Result<EventEnvelope> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&event.topic)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query(
            r#"
            SELECT topic, "offset", event_id, event_type, key, payload, metadata, timestamp
            FROM bus_events
            WHERE event_id = $1
            "#,
        )
        .bind(event.event_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            tx.commit().await?;
            return Self::row_to_event(row);
        }

        let last: Option<i64> =
            sqlx::query_scalar(r#"SELECT MAX("offset") FROM bus_events WHERE topic = $1"#)
                .bind(&event.topic)
                .fetch_one(&mut *tx)
                .await?;
        let offset = Offset::new(last.unwrap_or(0)).next();

        let metadata = serde_json::to_value(&event.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO bus_events (topic, "offset", event_id, event_type, key, payload, metadata, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&event.topic)
        .bind(offset.as_i64())
        .bind(event.event_id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.key)
        .bind(&event.payload)
        .bind(metadata)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(EventEnvelope::from_outgoing(event, offset))
    }

    async fn poll(&self, topic: &str, group: &str, max: usize) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT topic, "offset", event_id, event_type, key, payload, metadata, timestamp
            FROM bus_events
            WHERE topic = $1
              AND "offset" > COALESCE(
                  (SELECT committed FROM consumer_offsets WHERE topic = $1 AND consumer_group = $2),
                  0)
            ORDER BY "offset" ASC
            LIMIT $3
            "#,
        )
        .bind(topic)
        .bind(group)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn commit(&self, topic: &str, group: &str, offset: Offset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (topic, consumer_group, committed, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (topic, consumer_group) DO UPDATE SET
                committed = GREATEST(consumer_offsets.committed, EXCLUDED.committed),
                updated_at = NOW()
            "#,
        )
        .bind(topic)
        .bind(group)
        .bind(offset.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn committed_offset(&self, topic: &str, group: &str) -> Result<Offset> {
        let committed: Option<i64> = sqlx::query_scalar(
            "SELECT committed FROM consumer_offsets WHERE topic = $1 AND consumer_group = $2",
        )
        .bind(topic)
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        Ok(committed.map(Offset::new).unwrap_or_default())
    }

    async fn replay(&self, topic: &str) -> Result<EventStream> {
        let pool = self.pool.clone();
        let topic = topic.to_string();

        // Pages of REPLAY_PAGE events, flattened; ends after the first short page.
        let pages = stream::unfold(Some(Offset::start()), move |cursor| {
            let pool = pool.clone();
            let topic = topic.clone();
            async move {
                let after = cursor?;
                match Self::page(&pool, &topic, after).await {
                    Ok(events) => {
                        let next = match events.last() {
                            Some(last) if events.len() as i64 == REPLAY_PAGE => Some(last.offset),
                            _ => None,
                        };
                        let items: Vec<Result<EventEnvelope>> =
                            events.into_iter().map(Ok).collect();
                        Some((stream::iter(items), next))
                    }
                    Err(e) => Some((stream::iter(vec![Err(e)]), None)),
                }
            }
        });

        Ok(Box::pin(futures_util::StreamExt::flatten(pages)))
    }
}
