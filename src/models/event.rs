//! In-flight event messages carried on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::transaction::TransactionStatus;

/// Closed enumeration of webhook-subscribable event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    TransactionCreated,
    TransactionStatusChanged,
    TransactionCompleted,
    TransactionFailed,
    TransactionTimeout,
    TransactionRetry,
    TransactionManualResolution,
    TransactionReconciled,
    TransactionInconsistent,
    SystemAlert,
    SystemReconciliationStart,
    SystemReconciliationComplete,
    Test,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionCreated => "TransactionCreated",
            Self::TransactionStatusChanged => "TransactionStatusChanged",
            Self::TransactionCompleted => "TransactionCompleted",
            Self::TransactionFailed => "TransactionFailed",
            Self::TransactionTimeout => "TransactionTimeout",
            Self::TransactionRetry => "TransactionRetry",
            Self::TransactionManualResolution => "TransactionManualResolution",
            Self::TransactionReconciled => "TransactionReconciled",
            Self::TransactionInconsistent => "TransactionInconsistent",
            Self::SystemAlert => "SystemAlert",
            Self::SystemReconciliationStart => "SystemReconciliationStart",
            Self::SystemReconciliationComplete => "SystemReconciliationComplete",
            Self::Test => "Test",
        }
    }

    pub const ALL: [EventType; 13] = [
        Self::TransactionCreated,
        Self::TransactionStatusChanged,
        Self::TransactionCompleted,
        Self::TransactionFailed,
        Self::TransactionTimeout,
        Self::TransactionRetry,
        Self::TransactionManualResolution,
        Self::TransactionReconciled,
        Self::TransactionInconsistent,
        Self::SystemAlert,
        Self::SystemReconciliationStart,
        Self::SystemReconciliationComplete,
        Self::Test,
    ];
}

/// The transaction-events topic payload. Keyed by `transaction_id` so a
/// single partition preserves per-subject ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub transaction_id: Option<Uuid>,
    pub origin_system: String,
    pub current_status: Option<TransactionStatus>,
    pub previous_status: Option<TransactionStatus>,
    pub timestamp: DateTime<Utc>,
    pub payload: JsonValue,
    pub high_priority: bool,
}

impl EventMessage {
    pub fn for_transaction(
        event_type: EventType,
        transaction_id: Uuid,
        origin_system: impl Into<String>,
        current_status: Option<TransactionStatus>,
        previous_status: Option<TransactionStatus>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            transaction_id: Some(transaction_id),
            origin_system: origin_system.into(),
            current_status,
            previous_status,
            timestamp: Utc::now(),
            payload,
            high_priority: false,
        }
    }
}

/// The webhook-events topic payload — one per (event, matching
/// subscription) pair, idempotency-keyed by `event_id` which doubles as
/// the `WebhookDelivery` primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventMessage {
    pub event_id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: EventType,
    pub transaction_id: Option<Uuid>,
    pub origin_system: String,
    pub timestamp: DateTime<Utc>,
    pub payload: JsonValue,
    pub attempt_count: i32,
    pub high_priority: bool,
}
