//! Postgres-outbox-backed `EventBus`. Producers insert rows directly in
//! the same transaction as their domain write where possible; consumers
//! claim a batch with `SELECT ... FOR UPDATE SKIP LOCKED` so multiple
//! worker instances can poll the same topic without double-processing.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::errors::AppResult;

use super::{EventBus, EventEnvelope};

pub struct PostgresOutboxEventBus {
    pool: PgPool,
}

impl PostgresOutboxEventBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent send with up to 3 attempts and a 1s backoff between
    /// retries, per the event pipeline's producer contract.
    async fn publish_row(
        &self,
        id: Uuid,
        topic: &str,
        partition_key: &str,
        event_type: &str,
        payload: &JsonValue,
    ) -> AppResult<Uuid> {
        let mut last_err = None;
        for attempt in 0..3 {
            if attempt > 0 {
                sleep(Duration::from_secs(1)).await;
            }
            let result = sqlx::query(
                "INSERT INTO event_outbox (id, topic, partition_key, event_type, payload, status, attempt)
                 VALUES ($1, $2, $3, $4, $5, 'pending', 0)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(id)
            .bind(topic)
            .bind(partition_key)
            .bind(event_type)
            .bind(payload)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => return Ok(id),
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "event publish attempt failed, retrying");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("loop runs at least once").into())
    }
}

#[async_trait]
impl EventBus for PostgresOutboxEventBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        self.publish_row(id, topic, partition_key, event_type, &payload).await
    }

    async fn publish_with_id(
        &self,
        id: Uuid,
        topic: &str,
        partition_key: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> AppResult<Uuid> {
        self.publish_row(id, topic, partition_key, event_type, &payload).await
    }

    async fn poll(&self, topic: &str, batch_size: i64) -> AppResult<Vec<EventEnvelope>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, String, JsonValue, i32, chrono::DateTime<chrono::Utc>)>(
            "UPDATE event_outbox
             SET status = 'in_flight', locked_at = NOW()
             WHERE id IN (
                 SELECT id FROM event_outbox
                 WHERE topic = $1 AND status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, topic, partition_key, event_type, payload, attempt, created_at",
        )
        .bind(topic)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, topic, partition_key, event_type, payload, attempt, created_at)| EventEnvelope {
                id,
                topic,
                partition_key,
                event_type,
                payload,
                attempt,
                created_at,
            })
            .collect())
    }

    async fn ack(&self, envelope_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE event_outbox SET status = 'consumed', consumed_at = NOW() WHERE id = $1")
            .bind(envelope_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, envelope_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE event_outbox SET status = 'pending', attempt = attempt + 1, locked_at = NULL WHERE id = $1",
        )
        .bind(envelope_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
