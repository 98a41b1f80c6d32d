pub mod outbox;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::errors::AppResult;

pub use outbox::PostgresOutboxEventBus;

/// One envelope popped off a topic. `attempt` is this consumer's
/// delivery attempt count for the envelope, not the underlying
/// transaction's.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub topic: String,
    pub partition_key: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

/// A partitioned, at-least-once publish/subscribe transport. Ordering is
/// only guaranteed within a single `partition_key`; consumers must call
/// `ack` only once processing has fully completed — a crash between
/// `poll` and `ack` redelivers the envelope.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> AppResult<Uuid>;

    /// Same as `publish` but lets the caller pin the envelope id —
    /// used for the webhook-delivery topic, where the id must equal the
    /// `WebhookDelivery` primary key for idempotent consumption.
    async fn publish_with_id(
        &self,
        id: Uuid,
        topic: &str,
        partition_key: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> AppResult<Uuid>;

    async fn poll(&self, topic: &str, batch_size: i64) -> AppResult<Vec<EventEnvelope>>;

    async fn ack(&self, envelope_id: Uuid) -> AppResult<()>;

    /// Returns an in-flight envelope to the topic for redelivery,
    /// incrementing its attempt counter. Used when a consumer detects a
    /// transient failure rather than panicking mid-processing.
    async fn nack(&self, envelope_id: Uuid) -> AppResult<()>;
}
