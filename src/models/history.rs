//! Append-only transaction state-transition audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use super::transaction::TransactionStatus;

/// One observed state transition. `previous_status` is `None` only for the
/// very first entry written when a transaction is created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionHistoryEntry {
    pub id: i64,
    pub transaction_id: Uuid,
    pub previous_status: Option<TransactionStatus>,
    pub new_status: TransactionStatus,
    pub changed_at: DateTime<Utc>,
    pub reason: String,
    pub changed_by: String,
    pub context: Option<JsonValue>,
    pub attempt_number: i32,
    pub is_automatic: bool,
}

/// System actor tag used when `changed_by` is not a human operator.
pub const ACTOR_SYSTEM_RECONCILIATION: &str = "SYSTEM_RECONCILIATION";
pub const ACTOR_SYSTEM_MONITOR: &str = "SYSTEM_MONITOR";
pub const ACTOR_SYSTEM: &str = "SYSTEM";

#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub transaction_id: Uuid,
    pub previous_status: Option<TransactionStatus>,
    pub new_status: TransactionStatus,
    pub reason: String,
    pub changed_by: String,
    pub context: Option<JsonValue>,
    pub attempt_number: i32,
    pub is_automatic: bool,
}

impl NewHistoryEntry {
    pub fn automatic(
        transaction_id: Uuid,
        previous_status: Option<TransactionStatus>,
        new_status: TransactionStatus,
        reason: impl Into<String>,
        attempt_number: i32,
    ) -> Self {
        Self {
            transaction_id,
            previous_status,
            new_status,
            reason: reason.into(),
            changed_by: ACTOR_SYSTEM.to_string(),
            context: None,
            attempt_number,
            is_automatic: true,
        }
    }

    /// An automatic transition attributed to a specific system actor
    /// (e.g. the monitor) rather than the generic `SYSTEM` tag.
    pub fn automatic_as(
        transaction_id: Uuid,
        previous_status: Option<TransactionStatus>,
        new_status: TransactionStatus,
        reason: impl Into<String>,
        changed_by: impl Into<String>,
        attempt_number: i32,
    ) -> Self {
        Self {
            transaction_id,
            previous_status,
            new_status,
            reason: reason.into(),
            changed_by: changed_by.into(),
            context: None,
            attempt_number,
            is_automatic: true,
        }
    }

    pub fn manual(
        transaction_id: Uuid,
        previous_status: Option<TransactionStatus>,
        new_status: TransactionStatus,
        reason: impl Into<String>,
        changed_by: impl Into<String>,
        attempt_number: i32,
    ) -> Self {
        Self {
            transaction_id,
            previous_status,
            new_status,
            reason: reason.into(),
            changed_by: changed_by.into(),
            context: None,
            attempt_number,
            is_automatic: false,
        }
    }
}
