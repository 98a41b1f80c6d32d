//! Webhook subscription persistence.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::event::EventType;
use crate::models::WebhookSubscription;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<WebhookSubscription>>;

    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        id: Uuid,
        origin_system: &str,
        callback_url: &str,
        event_types: &[EventType],
        secret_hash: &str,
        secret_plaintext: &str,
        max_retries: Option<i32>,
        description: Option<&str>,
        contact_email: Option<&str>,
    ) -> AppResult<WebhookSubscription>;

    async fn set_active(&self, id: Uuid, expected_version: i64, active: bool) -> AppResult<WebhookSubscription>;

    async fn record_success(&self, id: Uuid) -> AppResult<()>;

    async fn record_failure(&self, id: Uuid) -> AppResult<()>;

    /// Active subscriptions for `origin_system` whose event set contains
    /// `event_type`.
    async fn find_matching(&self, origin_system: &str, event_type: EventType) -> AppResult<Vec<WebhookSubscription>>;

    async fn exists_duplicate(&self, origin_system: &str, callback_url: &str) -> AppResult<bool>;

    async fn delete(&self, id: Uuid) -> AppResult<()>;

    async fn list_all(&self, limit: i64) -> AppResult<Vec<WebhookSubscription>>;
}

pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, origin_system, callback_url, event_types, secret_hash,
     secret_plaintext, active, max_retries, description, contact_email,
     created_at, updated_at, last_success_at, last_failure_at,
     success_count, failure_count, version";

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<WebhookSubscription>> {
        let row = sqlx::query_as::<_, WebhookSubscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create(
        &self,
        id: Uuid,
        origin_system: &str,
        callback_url: &str,
        event_types: &[EventType],
        secret_hash: &str,
        secret_plaintext: &str,
        max_retries: Option<i32>,
        description: Option<&str>,
        contact_email: Option<&str>,
    ) -> AppResult<WebhookSubscription> {
        let row = sqlx::query_as::<_, WebhookSubscription>(&format!(
            "INSERT INTO webhook_subscriptions
                (id, origin_system, callback_url, event_types, secret_hash, secret_plaintext,
                 active, max_retries, description, contact_email)
             VALUES ($1, $2, $3, $4, $5, $6, true, $7, $8, $9)
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(id)
        .bind(origin_system)
        .bind(callback_url)
        .bind(sqlx::types::Json(event_types))
        .bind(secret_hash)
        .bind(secret_plaintext)
        .bind(max_retries)
        .bind(description)
        .bind(contact_email)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_active(&self, id: Uuid, expected_version: i64, active: bool) -> AppResult<WebhookSubscription> {
        let row = sqlx::query_as::<_, WebhookSubscription>(&format!(
            "UPDATE webhook_subscriptions
             SET active = $1, updated_at = NOW(), version = version + 1
             WHERE id = $2 AND version = $3
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(active)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| {
            AppError::Conflict(format!(
                "subscription {id} was modified concurrently (expected version {expected_version})"
            ))
        })
    }

    async fn record_success(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_subscriptions
             SET success_count = success_count + 1, last_success_at = NOW(), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE webhook_subscriptions
             SET failure_count = failure_count + 1, last_failure_at = NOW(), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_matching(&self, origin_system: &str, event_type: EventType) -> AppResult<Vec<WebhookSubscription>> {
        let rows = sqlx::query_as::<_, WebhookSubscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions
             WHERE active = true AND origin_system = $1 AND event_types @> $2"
        ))
        .bind(origin_system)
        .bind(sqlx::types::Json(vec![event_type]))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn exists_duplicate(&self, origin_system: &str, callback_url: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM webhook_subscriptions WHERE origin_system = $1 AND callback_url = $2)",
        )
        .bind(origin_system)
        .bind(callback_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_all(&self, limit: i64) -> AppResult<Vec<WebhookSubscription>> {
        let rows = sqlx::query_as::<_, WebhookSubscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
