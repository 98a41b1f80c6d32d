//! Outbound operator notifications on anomaly or critical failure.
//! Dispatch is asynchronous, pluggable, and never propagates failures
//! back to the caller — a broken alert channel must not take down the
//! subsystem reporting the problem.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// A pluggable outbound notification channel (email by default).
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, subject: &str, message: &str) -> anyhow::Result<()>;
}

/// Sends alerts via the Postmark HTTP API, matching the credentials and
/// silent-skip-when-unconfigured behavior used for other outbound mail.
pub struct PostmarkAlertChannel {
    client: reqwest::Client,
    api_key: Option<String>,
    from_email: String,
    to_email: String,
}

impl PostmarkAlertChannel {
    pub fn new(api_key: Option<String>, from_email: String, to_email: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from_email,
            to_email,
        }
    }
}

#[async_trait]
impl AlertChannel for PostmarkAlertChannel {
    async fn send(&self, subject: &str, message: &str) -> anyhow::Result<()> {
        let Some(api_key) = &self.api_key else {
            tracing::warn!("alert channel not configured, skipping: {subject}");
            return Ok(());
        };

        self.client
            .post("https://api.postmarkapp.com/email")
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("X-Postmark-Server-Token", api_key)
            .json(&serde_json::json!({
                "From": self.from_email,
                "To": self.to_email,
                "Subject": subject,
                "TextBody": message,
                "MessageStream": "outbound",
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct AlertDispatcher {
    channel: Arc<dyn AlertChannel>,
}

impl AlertDispatcher {
    pub fn new(channel: Box<dyn AlertChannel>) -> Self {
        Self { channel: Arc::from(channel) }
    }

    /// Fires the send on its own task so a hanging or slow channel never
    /// blocks the caller (a monitor sweep awaiting one alert per anomaly
    /// hit, for instance).
    fn dispatch(&self, subject: String, message: String) {
        let channel = self.channel.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.send(&subject, &message).await {
                tracing::error!(error = %e, subject = %subject, "alert dispatch failed");
            }
        });
    }

    pub async fn send_alert(&self, subject: &str, message: &str) {
        self.dispatch(subject.to_string(), message.to_string());
    }

    pub async fn send_transaction_alert(&self, transaction_id: uuid::Uuid, status: &str, reason: &str) {
        self.dispatch(
            format!("Transaction {transaction_id} needs attention"),
            format!("Status: {status}\nReason: {reason}"),
        );
    }

    pub async fn send_system_health_alert(&self, metrics_snapshot: &JsonValue, anomaly_count: usize) {
        self.dispatch(
            "System health anomaly threshold crossed".to_string(),
            format!("Anomalies detected: {anomaly_count}\nMetrics: {metrics_snapshot}"),
        );
    }

    pub async fn send_critical_error_alert(&self, error: &anyhow::Error, details: &str) {
        self.dispatch(
            "Critical scheduler error".to_string(),
            format!("Error: {error:?}\nDetails: {details}"),
        );
    }
}
