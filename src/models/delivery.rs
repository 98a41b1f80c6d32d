//! Webhook delivery entity and its status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use super::event::EventType;

/// Maximum stored length of a recorded response body excerpt.
pub const RESPONSE_BODY_EXCERPT_LIMIT: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    RetryScheduled,
    PermanentlyFailed,
    Canceled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::PermanentlyFailed | Self::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Delivered => "Delivered",
            Self::Failed => "Failed",
            Self::RetryScheduled => "RetryScheduled",
            Self::PermanentlyFailed => "PermanentlyFailed",
            Self::Canceled => "Canceled",
        }
    }
}

/// One outbound delivery attempt record. `id` is identical to the
/// event-id that produced it, which doubles as the idempotency key a
/// receiving endpoint can dedupe on.
///
/// `subscription_id` is `None` for a delivery fanned out to a
/// transaction's inline `webhook_url` rather than to a registered
/// subscription; the worker resolves the inline target (URL + security
/// token) from the transaction row in that case.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub event_type: EventType,
    pub status: DeliveryStatus,
    pub payload: JsonValue,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_response_code: Option<i32>,
    pub last_response_body: Option<String>,
    pub error_detail: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub ack_status: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    pub fn new(
        id: Uuid,
        subscription_id: Option<Uuid>,
        transaction_id: Option<Uuid>,
        event_type: EventType,
        payload: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            subscription_id,
            transaction_id,
            event_type,
            status: DeliveryStatus::Pending,
            payload,
            attempt_count: 0,
            last_attempt_at: None,
            last_response_code: None,
            last_response_body: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
            acknowledged: false,
            acknowledged_at: None,
            ack_status: None,
            next_retry_at: None,
        }
    }

    /// Truncates a response body to the stored excerpt limit, splitting
    /// on a char boundary.
    pub fn excerpt(body: &str) -> String {
        if body.len() <= RESPONSE_BODY_EXCERPT_LIMIT {
            return body.to_string();
        }
        let mut end = RESPONSE_BODY_EXCERPT_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}
