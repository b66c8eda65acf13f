use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    EventBusError, EventEnvelope, EventId, EventQuery, Result,
    transport::{EventStream, EventSubscription, EventTransport},
};

const SELECT_COLUMNS: &str =
    "SELECT id, event_type, aggregate_id, aggregate_type, timestamp, payload, metadata FROM domain_events";

/// PostgreSQL-backed event transport.
///
/// Publishing inserts into the `domain_events` table and then fans the event
/// out to subscribers in this process. Other processes read the table.
#[derive(Clone)]
pub struct PostgresEventTransport {
    pool: PgPool,
    sender: broadcast::Sender<EventEnvelope>,
}

impl PostgresEventTransport {
    /// Creates a new PostgreSQL event transport.
    pub fn new(pool: PgPool) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { pool, sender }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl EventTransport for PostgresEventTransport {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        let metadata_json = serde_json::to_value(&event.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO domain_events (id, event_type, aggregate_id, aggregate_type, timestamp, payload, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.aggregate_id)
        .bind(&event.aggregate_type)
        .bind(event.timestamp)
        .bind(&event.payload)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        let _ = self.sender.send(event);
        metrics::counter!("events_published_total").increment(1);
        Ok(())
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.sender.subscribe())
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        sql.push(" WHERE TRUE");

        if let Some(id) = query.aggregate_id {
            sql.push(" AND aggregate_id = ").push_bind(id);
        }
        if let Some(event_types) = query.event_types {
            sql.push(" AND event_type = ANY(").push_bind(event_types).push(")");
        }
        if let Some(since) = query.since {
            sql.push(" AND timestamp >= ").push_bind(since);
        }

        sql.push(" ORDER BY sequence ASC");
        if let Some(limit) = query.limit {
            sql.push(" LIMIT ").push_bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sql.push(" OFFSET ").push_bind(offset as i64);
        }

        let rows = sql.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all(&self) -> Result<EventStream> {
        use futures_util::stream;

        // Rows are materialized first so the stream does not borrow the pool.
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY sequence ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(EventBusError::Database)?;

        let stream = stream::iter(rows.into_iter().map(Self::row_to_event));
        Ok(Box::pin(stream))
    }
}
