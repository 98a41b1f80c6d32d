//! Webhook subscription registration, update, and event-type routing.

use std::sync::Arc;

use regex::Regex;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::event::EventType;
use crate::models::{NewSubscription, WebhookSubscription};
use crate::repositories::SubscriptionRepository;
use crate::signature;

/// Matches `https://` URLs with an optional port and path; rejects bare
/// IP literals and hostnames that look like loopback addresses.
fn callback_url_pattern() -> Regex {
    Regex::new(r"^https://[\w.-]+(:\d+)?(/[\w\-./?%&=]*)?$").expect("static pattern is valid")
}

fn is_loopback_host(url: &str) -> bool {
    let host = url
        .strip_prefix("https://")
        .and_then(|rest| rest.split(['/', ':']).next())
        .unwrap_or("");
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

pub struct SubscriptionRegistry {
    repository: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionRegistry {
    pub fn new(repository: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repository }
    }

    pub fn validate_callback_url(url: &str) -> AppResult<()> {
        if !callback_url_pattern().is_match(url) {
            return Err(AppError::Validation(format!("callback url {url} is not a valid https url")));
        }
        if is_loopback_host(url) {
            return Err(AppError::Validation("callback url must not point at a loopback address".into()));
        }
        Ok(())
    }

    pub async fn register(&self, new: NewSubscription) -> AppResult<WebhookSubscription> {
        Self::validate_callback_url(&new.callback_url)?;
        if new.event_types.is_empty() {
            return Err(AppError::Validation("at least one event type is required".into()));
        }
        if self.repository.exists_duplicate(&new.origin_system, &new.callback_url).await? {
            return Err(AppError::Conflict(format!(
                "a subscription for {} already targets {}",
                new.origin_system, new.callback_url
            )));
        }

        let secret_hash = signature::hash_secret(&new.secret).map_err(|e| AppError::Internal(e.to_string()))?;

        self.repository
            .create(
                Uuid::new_v4(),
                &new.origin_system,
                &new.callback_url,
                &new.event_types,
                &secret_hash,
                &new.secret,
                new.max_retries,
                new.description.as_deref(),
                new.contact_email.as_deref(),
            )
            .await
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
        self.repository.delete(id).await
    }

    pub async fn list_all(&self, limit: i64) -> AppResult<Vec<WebhookSubscription>> {
        self.repository.list_all(limit).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<WebhookSubscription>> {
        self.repository.find_by_id(id).await
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> AppResult<WebhookSubscription> {
        let existing = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
        self.repository.set_active(id, existing.version, active).await
    }

    /// All active subscriptions whose event set contains `event_type`
    /// and whose origin-system matches the producing transaction's.
    pub async fn find_matching(&self, origin_system: &str, event_type: EventType) -> AppResult<Vec<WebhookSubscription>> {
        self.repository.find_matching(origin_system, event_type).await
    }

    pub async fn record_delivery_success(&self, subscription_id: Uuid) -> AppResult<()> {
        self.repository.record_success(subscription_id).await
    }

    pub async fn record_delivery_failure(&self, subscription_id: Uuid) -> AppResult<()> {
        self.repository.record_failure(subscription_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_https_url() {
        assert!(SubscriptionRegistry::validate_callback_url("https://example.com/hooks").is_ok());
    }

    #[test]
    fn rejects_non_https_url() {
        assert!(SubscriptionRegistry::validate_callback_url("http://example.com/hooks").is_err());
    }

    #[test]
    fn rejects_loopback_hosts() {
        for url in [
            "https://localhost/hooks",
            "https://127.0.0.1/hooks",
            "https://[::1]/hooks",
        ] {
            // The bracketed IPv6 literal doesn't match the pattern at all,
            // which is an acceptable rejection too.
            assert!(SubscriptionRegistry::validate_callback_url(url).is_err());
        }
    }
}
