//! Webhook subscription entity: a registered endpoint, event-type filter,
//! and signing secret.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::event::EventType;

/// A registered webhook subscriber.
///
/// The signing secret is kept in two forms: `secret_hash` (bcrypt) is
/// what gets persisted for at-rest storage and for confirming an
/// operator-supplied secret during rotation; `secret_plaintext` carries
/// the live value needed to actually compute an HMAC, since a hash
/// cannot be un-hashed to sign with. Only the latter is ever handed to
/// the signature service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub origin_system: String,
    pub callback_url: String,
    pub event_types: Json<Vec<EventType>>,
    pub secret_hash: String,
    #[serde(skip_serializing)]
    pub secret_plaintext: String,
    pub active: bool,
    pub max_retries: Option<i32>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
    pub version: i64,
}

impl WebhookSubscription {
    /// Whether this subscription is eligible to receive a given event:
    /// active, and the event is in its subscribed set.
    pub fn matches(&self, origin_system: &str, event_type: EventType) -> bool {
        self.active
            && self.origin_system == origin_system
            && self.event_types.0.contains(&event_type)
    }

    pub fn effective_max_retries(&self, default_max_retries: i32) -> i32 {
        self.max_retries.unwrap_or(default_max_retries)
    }
}

/// Input to registering a new subscription. `secret` is the plaintext
/// value chosen by (or generated for) the subscriber.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    pub origin_system: String,
    pub callback_url: String,
    pub event_types: Vec<EventType>,
    pub secret: String,
    pub max_retries: Option<i32>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
}
