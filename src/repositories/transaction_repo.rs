//! Transaction persistence port and its Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{Transaction, TransactionStatus};

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Transaction>>;

    async fn insert_pending(&self, id: Uuid, origin_system: &str, payload: JsonValue, webhook_url: Option<&str>) -> AppResult<Transaction>;

    /// Applies an optimistic-locked update. `expected_version` must match
    /// the row's current `version`; on mismatch returns `Conflict`.
    #[allow(clippy::too_many_arguments)]
    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        new_status: TransactionStatus,
        response: Option<JsonValue>,
        error_details: Option<JsonValue>,
        completion_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> AppResult<Transaction>;

    async fn bump_attempt(&self, id: Uuid, expected_version: i64) -> AppResult<Transaction>;

    async fn mark_reconciled(&self, id: Uuid, expected_version: i64) -> AppResult<Transaction>;

    async fn list_non_terminal(&self, limit: i64) -> AppResult<Vec<Transaction>>;

    async fn list_unreconciled_problematic(&self, limit: i64) -> AppResult<Vec<Transaction>>;

    /// Terminal rows missing the payload their status implies:
    /// `Completed` without a `response`, or `Failed` without
    /// `error_details`. Anomalous regardless of how long ago they
    /// settled, so this is not bounded to `list_non_terminal`.
    async fn list_terminal_missing_payload(&self, limit: i64) -> AppResult<Vec<Transaction>>;
}

pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TRANSACTION_COLUMNS: &str = "id, origin_system, status, payload, response, error_details,
     attempt_count, created_at, updated_at, last_attempt_at, completion_at,
     webhook_url, webhook_security_token, is_reconciled, notes, version";

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_pending(
        &self,
        id: Uuid,
        origin_system: &str,
        payload: JsonValue,
        webhook_url: Option<&str>,
    ) -> AppResult<Transaction> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO transactions (id, origin_system, status, payload, attempt_count, webhook_url)
             VALUES ($1, $2, 'Pending', $3, 1, $4)
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(id)
        .bind(origin_system)
        .bind(payload)
        .bind(webhook_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        new_status: TransactionStatus,
        response: Option<JsonValue>,
        error_details: Option<JsonValue>,
        completion_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> AppResult<Transaction> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions
             SET status = $1,
                 response = COALESCE($2, response),
                 error_details = COALESCE($3, error_details),
                 completion_at = COALESCE($4, completion_at),
                 notes = COALESCE($5, notes),
                 updated_at = NOW(),
                 version = version + 1
             WHERE id = $6 AND version = $7
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(new_status)
        .bind(response)
        .bind(error_details)
        .bind(completion_at)
        .bind(notes)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| {
            AppError::Conflict(format!(
                "transaction {id} was modified concurrently (expected version {expected_version})"
            ))
        })
    }

    async fn bump_attempt(&self, id: Uuid, expected_version: i64) -> AppResult<Transaction> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions
             SET attempt_count = attempt_count + 1,
                 last_attempt_at = NOW(),
                 updated_at = NOW(),
                 version = version + 1
             WHERE id = $1 AND version = $2
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| {
            AppError::Conflict(format!(
                "transaction {id} was modified concurrently (expected version {expected_version})"
            ))
        })
    }

    async fn mark_reconciled(&self, id: Uuid, expected_version: i64) -> AppResult<Transaction> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions
             SET is_reconciled = true, updated_at = NOW(), version = version + 1
             WHERE id = $1 AND version = $2
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| {
            AppError::Conflict(format!(
                "transaction {id} was modified concurrently (expected version {expected_version})"
            ))
        })
    }

    async fn list_non_terminal(&self, limit: i64) -> AppResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE status NOT IN ('Completed', 'Failed', 'PermanentlyFailed')
             ORDER BY updated_at ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_unreconciled_problematic(&self, limit: i64) -> AppResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE status IN ('Timeout', 'Inconsistent') AND is_reconciled = false
             ORDER BY updated_at ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_terminal_missing_payload(&self, limit: i64) -> AppResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE (status = 'Completed' AND response IS NULL)
                OR (status = 'Failed' AND error_details IS NULL)
             ORDER BY updated_at ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
