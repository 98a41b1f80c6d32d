//! Webhook delivery persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::WebhookDelivery;

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Idempotent insert keyed on `delivery.id` (== the producing
    /// event-id); a pre-existing row in a non-initial state is left
    /// untouched and returned as-is.
    async fn insert_if_absent(&self, delivery: WebhookDelivery) -> AppResult<WebhookDelivery>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<WebhookDelivery>>;

    async fn mark_processing(&self, id: Uuid) -> AppResult<Option<WebhookDelivery>>;

    async fn mark_delivered(&self, id: Uuid, response_code: i32, response_body: Option<String>) -> AppResult<()>;

    async fn mark_failed_retry_scheduled(
        &self,
        id: Uuid,
        error_detail: JsonValue,
        response_code: Option<i32>,
        response_body: Option<String>,
        next_retry_at: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn mark_permanently_failed(
        &self,
        id: Uuid,
        error_detail: JsonValue,
        response_code: Option<i32>,
        response_body: Option<String>,
    ) -> AppResult<()>;

    async fn mark_acknowledged(&self, id: Uuid, ack_status: &str) -> AppResult<()>;

    async fn list_due_for_retry(&self, limit: i64) -> AppResult<Vec<WebhookDelivery>>;

    async fn list_hung(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<WebhookDelivery>>;

    async fn list_stale_terminal(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<WebhookDelivery>>;

    async fn list_for_transaction(&self, transaction_id: Uuid) -> AppResult<Vec<WebhookDelivery>>;
}

pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DELIVERY_COLUMNS: &str = "id, subscription_id, transaction_id, event_type, status, payload,
     attempt_count, last_attempt_at, last_response_code, last_response_body,
     error_detail, created_at, updated_at, acknowledged, acknowledged_at,
     ack_status, next_retry_at";

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn insert_if_absent(&self, delivery: WebhookDelivery) -> AppResult<WebhookDelivery> {
        let inserted = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "INSERT INTO webhook_deliveries
                (id, subscription_id, transaction_id, event_type, status, payload, attempt_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO NOTHING
             RETURNING {DELIVERY_COLUMNS}"
        ))
        .bind(delivery.id)
        .bind(delivery.subscription_id)
        .bind(delivery.transaction_id)
        .bind(delivery.event_type)
        .bind(delivery.status)
        .bind(&delivery.payload)
        .bind(delivery.attempt_count)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(row),
            None => {
                let existing = self.find_by_id(delivery.id).await?;
                Ok(existing.unwrap_or(delivery))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<WebhookDelivery>> {
        let row = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_processing(&self, id: Uuid) -> AppResult<Option<WebhookDelivery>> {
        let row = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "UPDATE webhook_deliveries
             SET status = 'Processing', attempt_count = attempt_count + 1,
                 last_attempt_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status IN ('Pending', 'RetryScheduled')
             RETURNING {DELIVERY_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_delivered(&self, id: Uuid, response_code: i32, response_body: Option<String>) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_deliveries
             SET status = 'Delivered', last_response_code = $1, last_response_body = $2, updated_at = NOW()
             WHERE id = $3",
        )
        .bind(response_code)
        .bind(response_body)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed_retry_scheduled(
        &self,
        id: Uuid,
        error_detail: JsonValue,
        response_code: Option<i32>,
        response_body: Option<String>,
        next_retry_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_deliveries
             SET status = 'RetryScheduled', error_detail = $1, last_response_code = $2,
                 last_response_body = $3, next_retry_at = $4, updated_at = NOW()
             WHERE id = $5",
        )
        .bind(error_detail)
        .bind(response_code)
        .bind(response_body)
        .bind(next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_permanently_failed(
        &self,
        id: Uuid,
        error_detail: JsonValue,
        response_code: Option<i32>,
        response_body: Option<String>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_deliveries
             SET status = 'PermanentlyFailed', error_detail = $1, last_response_code = $2,
                 last_response_body = $3, next_retry_at = NULL, updated_at = NOW()
             WHERE id = $4",
        )
        .bind(error_detail)
        .bind(response_code)
        .bind(response_body)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_acknowledged(&self, id: Uuid, ack_status: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_deliveries
             SET acknowledged = true, acknowledged_at = NOW(), ack_status = $1, updated_at = NOW()
             WHERE id = $2",
        )
        .bind(ack_status)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_due_for_retry(&self, limit: i64) -> AppResult<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
             WHERE status = 'RetryScheduled' AND next_retry_at <= NOW()
             ORDER BY next_retry_at ASC
             LIMIT $1
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_hung(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
             WHERE status = 'Processing' AND last_attempt_at < $1
             ORDER BY last_attempt_at ASC
             LIMIT $2
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_stale_terminal(&self, older_than: DateTime<Utc>, limit: i64) -> AppResult<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
             WHERE status IN ('Delivered', 'PermanentlyFailed', 'Canceled') AND updated_at < $1
             ORDER BY updated_at ASC
             LIMIT $2"
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_for_transaction(&self, transaction_id: Uuid) -> AppResult<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
             WHERE transaction_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
