//! Append-only transaction history persistence.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::{NewHistoryEntry, TransactionHistoryEntry};

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn append(&self, entry: NewHistoryEntry) -> AppResult<TransactionHistoryEntry>;

    async fn list_for_transaction(&self, transaction_id: Uuid) -> AppResult<Vec<TransactionHistoryEntry>>;
}

pub struct PgHistoryRepository {
    pool: PgPool,
}

impl PgHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryRepository for PgHistoryRepository {
    async fn append(&self, entry: NewHistoryEntry) -> AppResult<TransactionHistoryEntry> {
        let row = sqlx::query_as::<_, TransactionHistoryEntry>(
            "INSERT INTO transaction_history
                (transaction_id, previous_status, new_status, reason, changed_by, context, attempt_number, is_automatic)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id, transaction_id, previous_status, new_status, changed_at, reason,
                       changed_by, context, attempt_number, is_automatic",
        )
        .bind(entry.transaction_id)
        .bind(entry.previous_status)
        .bind(entry.new_status)
        .bind(entry.reason)
        .bind(entry.changed_by)
        .bind(entry.context)
        .bind(entry.attempt_number)
        .bind(entry.is_automatic)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_transaction(&self, transaction_id: Uuid) -> AppResult<Vec<TransactionHistoryEntry>> {
        let rows = sqlx::query_as::<_, TransactionHistoryEntry>(
            "SELECT id, transaction_id, previous_status, new_status, changed_at, reason,
                    changed_by, context, attempt_number, is_automatic
             FROM transaction_history
             WHERE transaction_id = $1
             ORDER BY changed_at ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
