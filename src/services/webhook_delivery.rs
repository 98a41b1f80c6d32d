//! Webhook delivery engine: fan-out on transaction state changes, signed
//! dispatch over a pooled HTTPS client, retry/backoff, dead-lettering,
//! hang sweep, and terminal-delivery archival.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::eventbus::EventBus;
use crate::ids;
use crate::metrics::Metrics;
use crate::models::{EventType, Transaction, WebhookDelivery};
use crate::repositories::{DeliveryRepository, SubscriptionRepository, TransactionRepository};
use crate::signature;

pub const WEBHOOK_EVENTS_TOPIC: &str = "webhook-events";

/// A resolved delivery target: either a registered subscription or a
/// transaction's inline webhook URL.
struct Target {
    subscription_id: Option<Uuid>,
    url: String,
    secret: String,
    max_retries: i32,
}

pub struct WebhookDeliveryEngine {
    deliveries: Arc<dyn DeliveryRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    transactions: Arc<dyn TransactionRepository>,
    event_bus: Arc<dyn EventBus>,
    client: Client,
    metrics: Arc<Metrics>,
    retry_max_attempts: i32,
    retry_base_delay_seconds: i64,
    hang_timeout: Duration,
    cleanup_max_age: Duration,
}

impl WebhookDeliveryEngine {
    pub fn new(
        deliveries: Arc<dyn DeliveryRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        transactions: Arc<dyn TransactionRepository>,
        event_bus: Arc<dyn EventBus>,
        metrics: Arc<Metrics>,
        config: &AppConfig,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(StdDuration::from_millis(config.webhook_connection_timeout_ms))
            .timeout(StdDuration::from_millis(config.webhook_socket_timeout_ms))
            .pool_max_idle_per_host(config.webhook_max_connections_per_route)
            .pool_idle_timeout(StdDuration::from_secs(60))
            .build()?;

        Ok(Self {
            deliveries,
            subscriptions,
            transactions,
            event_bus,
            client,
            metrics,
            retry_max_attempts: config.webhook_retry_max_attempts,
            retry_base_delay_seconds: config.webhook_retry_base_delay_seconds,
            hang_timeout: Duration::minutes(config.webhook_hang_timeout_minutes),
            cleanup_max_age: Duration::hours(config.webhook_cleanup_max_age_hours),
        })
    }

    /// Resolves matching subscriptions plus the transaction's inline
    /// webhook URL (if any), creates a `Pending` delivery row for each,
    /// and enqueues an envelope on the delivery topic keyed by
    /// subscription id (or transaction id for the inline target).
    pub async fn fan_out(
        &self,
        transaction: &Transaction,
        event_type: EventType,
        previous_status: Option<crate::models::TransactionStatus>,
    ) -> AppResult<usize> {
        let payload = json!({
            "transactionId": transaction.id,
            "originSystem": transaction.origin_system,
            "eventType": event_type.as_str(),
            "currentStatus": transaction.status.as_str(),
            "previousStatus": previous_status.map(|s| s.as_str()),
            "timestamp": Utc::now().to_rfc3339(),
        });

        let mut created = 0usize;

        let matching = self.subscriptions.find_matching(&transaction.origin_system, event_type).await?;
        for subscription in matching {
            self.create_delivery(
                Some(subscription.id),
                Some(transaction.id),
                event_type,
                payload.clone(),
                &subscription.id.to_string(),
            )
            .await?;
            created += 1;
        }

        if let Some(webhook_url) = &transaction.webhook_url {
            if !webhook_url.is_empty() {
                self.create_delivery(None, Some(transaction.id), event_type, payload, &transaction.id.to_string())
                    .await?;
                created += 1;
            }
        }

        Ok(created)
    }

    async fn create_delivery(
        &self,
        subscription_id: Option<Uuid>,
        transaction_id: Option<Uuid>,
        event_type: EventType,
        payload: JsonValue,
        partition_key: &str,
    ) -> AppResult<()> {
        let delivery_id = ids::new_ordered_id();
        let delivery = WebhookDelivery::new(delivery_id, subscription_id, transaction_id, event_type, payload.clone());
        self.deliveries.insert_if_absent(delivery).await?;
        self.event_bus
            .publish_with_id(delivery_id, WEBHOOK_EVENTS_TOPIC, partition_key, event_type.as_str(), payload)
            .await?;
        Ok(())
    }

    async fn resolve_target(&self, delivery: &WebhookDelivery) -> AppResult<Option<Target>> {
        match delivery.subscription_id {
            Some(subscription_id) => {
                let Some(subscription) = self.subscriptions.find_by_id(subscription_id).await? else {
                    return Ok(None);
                };
                if !subscription.active {
                    return Ok(None);
                }
                Ok(Some(Target {
                    subscription_id: Some(subscription.id),
                    url: subscription.callback_url.clone(),
                    secret: subscription.secret_plaintext.clone(),
                    max_retries: subscription.effective_max_retries(self.retry_max_attempts),
                }))
            }
            None => {
                let Some(transaction_id) = delivery.transaction_id else {
                    return Ok(None);
                };
                let Some(transaction) = self.transactions.find_by_id(transaction_id).await? else {
                    return Ok(None);
                };
                let (Some(url), Some(secret)) = (transaction.webhook_url, transaction.webhook_security_token) else {
                    return Ok(None);
                };
                Ok(Some(Target {
                    subscription_id: None,
                    url,
                    secret,
                    max_retries: self.retry_max_attempts,
                }))
            }
        }
    }

    /// Runs one delivery attempt for the delivery named by `delivery_id`.
    /// Returns `Ok(())` whether the attempt succeeded, failed-with-retry,
    /// or dead-lettered — all are normal outcomes, not errors.
    pub async fn attempt_delivery(&self, delivery_id: Uuid) -> AppResult<()> {
        let Some(delivery) = self.deliveries.mark_processing(delivery_id).await? else {
            return Ok(());
        };
        self.metrics.record_delivery_attempted();

        let Some(target) = self.resolve_target(&delivery).await? else {
            self.deliveries
                .mark_permanently_failed(delivery.id, json!({"reason": "target inactive or missing"}), None, None)
                .await?;
            self.metrics.record_delivery_dead_lettered();
            return Ok(());
        };

        let payload_bytes = serde_json::to_vec(&delivery.payload).map_err(|e| AppError::Internal(e.to_string()))?;
        let signature = signature::sign(&target.secret, &payload_bytes).map_err(|e| AppError::Internal(e.to_string()))?;
        let nonce = ids::nonce();
        let timestamp_header = signature::format_timestamp_header(Utc::now().timestamp_millis(), &nonce);

        let response = self
            .client
            .post(&target.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-ID", target.subscription_id.map(|id| id.to_string()).unwrap_or_default())
            .header("X-Delivery-ID", delivery.id.to_string())
            .header("X-Event-Type", delivery.event_type.as_str())
            .header("X-Webhook-Timestamp", timestamp_header)
            .body(payload_bytes)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                let status_code = response.status().as_u16() as i32;
                let body = response.text().await.unwrap_or_default();
                self.deliveries
                    .mark_delivered(delivery.id, status_code, Some(WebhookDelivery::excerpt(&body)))
                    .await?;
                self.metrics.record_delivery_delivered();
                if let Some(subscription_id) = target.subscription_id {
                    self.subscriptions.record_success(subscription_id).await?;
                }
            }
            Ok(response) => {
                let status_code = response.status().as_u16() as i32;
                let body = response.text().await.unwrap_or_default();
                self.handle_failure(
                    &delivery,
                    &target,
                    json!({"httpStatus": status_code}),
                    Some(status_code),
                    Some(WebhookDelivery::excerpt(&body)),
                )
                .await?;
            }
            Err(e) => {
                self.handle_failure(&delivery, &target, json!({"error": e.to_string()}), None, None).await?;
            }
        }

        Ok(())
    }

    async fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        target: &Target,
        error_detail: JsonValue,
        response_code: Option<i32>,
        response_body: Option<String>,
    ) -> AppResult<()> {
        let next_attempt = delivery.attempt_count;
        if next_attempt >= target.max_retries {
            self.deliveries
                .mark_permanently_failed(delivery.id, error_detail, response_code, response_body)
                .await?;
            self.metrics.record_delivery_dead_lettered();
        } else {
            let delay = retry_delay_seconds(next_attempt, self.retry_base_delay_seconds);
            let next_retry_at = Utc::now() + Duration::seconds(delay);
            self.deliveries
                .mark_failed_retry_scheduled(delivery.id, error_detail, response_code, response_body, next_retry_at)
                .await?;
        }
        if let Some(subscription_id) = target.subscription_id {
            self.subscriptions.record_failure(subscription_id).await?;
        }
        Ok(())
    }

    pub async fn due_retries(&self, batch_size: i64) -> AppResult<Vec<WebhookDelivery>> {
        self.deliveries.list_due_for_retry(batch_size).await
    }

    /// Deliveries stuck in `Processing` past the hang timeout are forced
    /// to `Failed` and re-enter the failure policy.
    pub async fn sweep_hung(&self, batch_size: i64) -> AppResult<usize> {
        let cutoff = Utc::now() - self.hang_timeout;
        let hung = self.deliveries.list_hung(cutoff, batch_size).await?;
        let count = hung.len();
        for delivery in hung {
            let target = self.resolve_target(&delivery).await?;
            let max_retries = target.as_ref().map(|t| t.max_retries).unwrap_or(self.retry_max_attempts);
            let subscription_id = target.as_ref().and_then(|t| t.subscription_id);
            let error_detail = json!({"reason": "processing timeout"});

            if delivery.attempt_count >= max_retries {
                self.deliveries
                    .mark_permanently_failed(delivery.id, error_detail, None, None)
                    .await?;
                self.metrics.record_delivery_dead_lettered();
            } else {
                let delay = retry_delay_seconds(delivery.attempt_count, self.retry_base_delay_seconds);
                let next_retry_at = Utc::now() + Duration::seconds(delay);
                self.deliveries
                    .mark_failed_retry_scheduled(delivery.id, error_detail, None, None, next_retry_at)
                    .await?;
            }
            if let Some(subscription_id) = subscription_id {
                self.subscriptions.record_failure(subscription_id).await?;
            }
        }
        Ok(count)
    }

    /// Daily archival sweep: deliveries in a terminal state older than
    /// the configured max age are marked acknowledged so operator views
    /// can filter them out. Never deletes rows.
    pub async fn sweep_stale_terminal(&self, batch_size: i64) -> AppResult<usize> {
        let cutoff = Utc::now() - self.cleanup_max_age;
        let stale = self.deliveries.list_stale_terminal(cutoff, batch_size).await?;
        let count = stale.len();
        for delivery in stale {
            if !delivery.acknowledged {
                self.deliveries.mark_acknowledged(delivery.id, "archived").await?;
            }
        }
        Ok(count)
    }
}

/// `delay = min(3600, 2^(attempt-1) * base) * (1 + U[0,0.25])`, rounded
/// to whole seconds.
pub fn retry_delay_seconds(attempt: i32, base: i64) -> i64 {
    let attempt = attempt.max(1);
    let exponential = 2i64.saturating_pow((attempt - 1) as u32).saturating_mul(base).min(3600);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..=0.25);
    ((exponential as f64) * (1.0 + jitter)).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_exponentially_and_caps_at_an_hour() {
        assert!(retry_delay_seconds(1, 60) >= 60);
        assert!(retry_delay_seconds(1, 60) <= 75);
        assert!(retry_delay_seconds(6, 60) <= 3600 + (3600 / 4));
        assert!(retry_delay_seconds(20, 60) <= 3600 + (3600 / 4));
    }
}
