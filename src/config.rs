//! Environment-backed application configuration.

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub environment: String,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_min_connections: u32,
    pub database_acquire_timeout_secs: u64,

    pub transaction_timeout_pending_minutes: i64,
    pub transaction_timeout_processing_minutes: i64,
    pub transaction_retry_max_attempts: i32,
    pub transaction_monitor_interval_ms: u64,

    pub webhook_retry_max_attempts: i32,
    pub webhook_retry_base_delay_seconds: i64,
    pub webhook_connection_timeout_ms: u64,
    pub webhook_socket_timeout_ms: u64,
    pub webhook_max_total_connections: usize,
    pub webhook_max_connections_per_route: usize,
    pub webhook_signature_algorithm: String,
    pub webhook_hang_timeout_minutes: i64,
    pub webhook_cleanup_max_age_hours: i64,
    pub webhook_retry_poll_interval_ms: u64,
    pub webhook_hang_sweep_interval_ms: u64,
    pub webhook_cleanup_sweep_interval_ms: u64,
    pub webhook_retry_batch_size: i64,
    pub webhook_hang_sweep_batch_size: i64,
    pub webhook_cleanup_batch_size: i64,

    pub transaction_events_poll_interval_ms: u64,
    pub transaction_events_batch_size: i64,
    pub webhook_events_poll_interval_ms: u64,
    pub webhook_events_batch_size: i64,

    pub monitor_sweep_batch_size: i64,

    pub anomaly_pending_threshold_minutes: i64,
    pub anomaly_processing_threshold_minutes: i64,
    pub anomaly_retry_threshold: i32,
    pub anomaly_state_change_threshold: i64,

    pub idempotency_critical_fields: Vec<String>,
    pub idempotency_ignored_fields: Vec<String>,
    pub idempotency_similarity_threshold: u32,

    pub default_pool_core_size: usize,
    pub default_pool_max_size: usize,
    pub default_pool_queue_depth: usize,
    pub webhook_pool_core_size: usize,
    pub webhook_pool_max_size: usize,
    pub webhook_pool_queue_depth: usize,
    pub monitor_pool_core_size: usize,
    pub monitor_pool_max_size: usize,
    pub monitor_pool_queue_depth: usize,

    pub alert_postmark_api_key: Option<String>,
    pub alert_from_email: String,
    pub alert_to_email: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn csv_env(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            value.split(',').map(|s| s.trim().to_string()).collect()
        }
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            environment: env_or("ENVIRONMENT", "development"),
            port: parse_env("PORT", 8080u16)?,
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL required")?,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 20u32)?,
            database_min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2u32)?,
            database_acquire_timeout_secs: parse_env("DATABASE_ACQUIRE_TIMEOUT_SECS", 10u64)?,

            transaction_timeout_pending_minutes: parse_env("TRANSACTION_TIMEOUT_PENDING_MINUTES", 5i64)?,
            transaction_timeout_processing_minutes: parse_env(
                "TRANSACTION_TIMEOUT_PROCESSING_MINUTES",
                10i64,
            )?,
            transaction_retry_max_attempts: parse_env("TRANSACTION_RETRY_MAX_ATTEMPTS", 3i32)?,
            transaction_monitor_interval_ms: parse_env("TRANSACTION_MONITOR_INTERVAL_MS", 60_000u64)?,

            webhook_retry_max_attempts: parse_env("WEBHOOK_RETRY_MAX_ATTEMPTS", 5i32)?,
            webhook_retry_base_delay_seconds: parse_env("WEBHOOK_RETRY_BASE_DELAY_SECONDS", 60i64)?,
            webhook_connection_timeout_ms: parse_env("WEBHOOK_CONNECTION_TIMEOUT_MS", 5_000u64)?,
            webhook_socket_timeout_ms: parse_env("WEBHOOK_SOCKET_TIMEOUT_MS", 10_000u64)?,
            webhook_max_total_connections: parse_env("WEBHOOK_MAX_TOTAL_CONNECTIONS", 100usize)?,
            webhook_max_connections_per_route: parse_env("WEBHOOK_MAX_CONNECTIONS_PER_ROUTE", 20usize)?,
            webhook_signature_algorithm: env_or("WEBHOOK_SIGNATURE_ALGORITHM", "HmacSHA256"),
            webhook_hang_timeout_minutes: parse_env("WEBHOOK_HANG_TIMEOUT_MINUTES", 30i64)?,
            webhook_cleanup_max_age_hours: parse_env("WEBHOOK_CLEANUP_MAX_AGE_HOURS", 24i64)?,
            webhook_retry_poll_interval_ms: parse_env("WEBHOOK_RETRY_POLL_INTERVAL_MS", 15_000u64)?,
            webhook_hang_sweep_interval_ms: parse_env("WEBHOOK_HANG_SWEEP_INTERVAL_MS", 60_000u64)?,
            webhook_cleanup_sweep_interval_ms: parse_env("WEBHOOK_CLEANUP_SWEEP_INTERVAL_MS", 3_600_000u64)?,
            webhook_retry_batch_size: parse_env("WEBHOOK_RETRY_BATCH_SIZE", 100i64)?,
            webhook_hang_sweep_batch_size: parse_env("WEBHOOK_HANG_SWEEP_BATCH_SIZE", 100i64)?,
            webhook_cleanup_batch_size: parse_env("WEBHOOK_CLEANUP_BATCH_SIZE", 500i64)?,

            transaction_events_poll_interval_ms: parse_env("TRANSACTION_EVENTS_POLL_INTERVAL_MS", 2_000u64)?,
            transaction_events_batch_size: parse_env("TRANSACTION_EVENTS_BATCH_SIZE", 50i64)?,
            webhook_events_poll_interval_ms: parse_env("WEBHOOK_EVENTS_POLL_INTERVAL_MS", 2_000u64)?,
            webhook_events_batch_size: parse_env("WEBHOOK_EVENTS_BATCH_SIZE", 100i64)?,

            monitor_sweep_batch_size: parse_env("MONITOR_SWEEP_BATCH_SIZE", 200i64)?,

            anomaly_pending_threshold_minutes: parse_env("ANOMALY_PENDING_THRESHOLD_MINUTES", 30i64)?,
            anomaly_processing_threshold_minutes: parse_env(
                "ANOMALY_PROCESSING_THRESHOLD_MINUTES",
                60i64,
            )?,
            anomaly_retry_threshold: parse_env("ANOMALY_RETRY_THRESHOLD", 5i32)?,
            anomaly_state_change_threshold: parse_env("ANOMALY_STATE_CHANGE_THRESHOLD", 10i64)?,

            idempotency_critical_fields: csv_env(
                "IDEMPOTENCY_CRITICAL_FIELDS",
                &["amount", "accountNumber", "description", "reference"],
            ),
            idempotency_ignored_fields: csv_env(
                "IDEMPOTENCY_IGNORED_FIELDS",
                &["timestamp", "clientIp", "deviceId"],
            ),
            idempotency_similarity_threshold: parse_env("IDEMPOTENCY_SIMILARITY_THRESHOLD", 80u32)?,

            default_pool_core_size: parse_env("DEFAULT_POOL_CORE_SIZE", 5usize)?,
            default_pool_max_size: parse_env("DEFAULT_POOL_MAX_SIZE", 10usize)?,
            default_pool_queue_depth: parse_env("DEFAULT_POOL_QUEUE_DEPTH", 25usize)?,
            webhook_pool_core_size: parse_env("WEBHOOK_POOL_CORE_SIZE", 10usize)?,
            webhook_pool_max_size: parse_env("WEBHOOK_POOL_MAX_SIZE", 20usize)?,
            webhook_pool_queue_depth: parse_env("WEBHOOK_POOL_QUEUE_DEPTH", 50usize)?,
            monitor_pool_core_size: parse_env("MONITOR_POOL_CORE_SIZE", 2usize)?,
            monitor_pool_max_size: parse_env("MONITOR_POOL_MAX_SIZE", 5usize)?,
            monitor_pool_queue_depth: parse_env("MONITOR_POOL_QUEUE_DEPTH", 10usize)?,

            alert_postmark_api_key: std::env::var("ALERT_POSTMARK_API_KEY").ok(),
            alert_from_email: env_or("ALERT_FROM_EMAIL", "alerts@txncore.local"),
            alert_to_email: env_or("ALERT_TO_EMAIL", "oncall@txncore.local"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn idempotency_config(&self) -> crate::idempotency::IdempotencyConfig {
        crate::idempotency::IdempotencyConfig {
            critical_fields: self.idempotency_critical_fields.clone(),
            ignored_fields: self.idempotency_ignored_fields.iter().cloned().collect(),
            similarity_threshold_pct: self.idempotency_similarity_threshold,
            numeric_tolerance: 1e-4,
        }
    }
}
