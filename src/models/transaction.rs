//! Transaction entity and status enum.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a tracked transaction. The allowed transitions
/// between these are enforced by `domain::state_machine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
    Inconsistent,
    PermanentlyFailed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::PermanentlyFailed
        )
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_problematic(self) -> bool {
        matches!(self, Self::Timeout | Self::Inconsistent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Timeout => "Timeout",
            Self::Inconsistent => "Inconsistent",
            Self::PermanentlyFailed => "PermanentlyFailed",
        }
    }
}

/// A caller-tracked asynchronous business operation.
///
/// `completion_at` is set iff the status is `Completed`, `Failed`, or
/// `PermanentlyFailed`; `error_details` is present iff status is `Failed`
/// or `PermanentlyFailed`; `response` is present iff status is
/// `Completed`; `attempt_count` never decreases.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub origin_system: String,
    pub status: TransactionStatus,
    pub payload: JsonValue,
    pub response: Option<JsonValue>,
    pub error_details: Option<JsonValue>,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completion_at: Option<DateTime<Utc>>,
    pub webhook_url: Option<String>,
    pub webhook_security_token: Option<String>,
    pub is_reconciled: bool,
    pub notes: Option<String>,
    pub version: i64,
}

impl Transaction {
    pub fn new(id: Uuid, origin_system: String, payload: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id,
            origin_system,
            status: TransactionStatus::Pending,
            payload,
            response: None,
            error_details: None,
            attempt_count: 1,
            created_at: now,
            updated_at: now,
            last_attempt_at: Some(now),
            completion_at: None,
            webhook_url: None,
            webhook_security_token: None,
            is_reconciled: false,
            notes: None,
            version: 0,
        }
    }

    /// Age since creation, used by the timeout detection rules.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Age since the last activity (attempt, or creation if none yet).
    pub fn idle_duration(&self) -> chrono::Duration {
        let since = self.last_attempt_at.unwrap_or(self.created_at);
        Utc::now() - since
    }
}

/// Request payload as submitted by a caller, keyed on the caller-chosen
/// transaction id, representing an incoming submission to be processed.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRequest {
    pub id: Uuid,
    pub origin_system: String,
    pub payload: HashMap<String, JsonValue>,
    pub webhook_url: Option<String>,
    pub retry: bool,
}
