//! Background ticker loops wiring the Monitor and the webhook delivery
//! engine's retry/hang/cleanup sweeps into periodic tasks, plus the two
//! event-bus consumers that turn transaction state changes into webhook
//! deliveries and drive each delivery's first attempt.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::eventbus::{EventBus, EventEnvelope};
use crate::models::{EventType, TransactionStatus};
use crate::monitor::Monitor;
use crate::repositories::TransactionRepository;
use crate::services::alert_dispatcher::AlertDispatcher;
use crate::services::transaction_service::TRANSACTION_EVENTS_TOPIC;
use crate::services::webhook_delivery::{WebhookDeliveryEngine, WEBHOOK_EVENTS_TOPIC};
use crate::workerpool::BoundedPool;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub monitor_interval: Duration,
    pub retry_poll_interval: Duration,
    pub hang_sweep_interval: Duration,
    pub cleanup_sweep_interval: Duration,
    pub retry_batch_size: i64,
    pub hang_sweep_batch_size: i64,
    pub cleanup_batch_size: i64,
    pub transaction_events_poll_interval: Duration,
    pub transaction_events_batch_size: i64,
    pub webhook_events_poll_interval: Duration,
    pub webhook_events_batch_size: i64,
}

/// Spawns one background task per sweep/consumer kind. Each loop is
/// independent: a slow or failing loop of one kind never blocks
/// another. `monitor_pool`, `webhook_pool`, and `default_pool` bound the
/// work each loop hands off concurrently.
#[allow(clippy::too_many_arguments)]
pub fn start_scheduler(
    monitor: Arc<Monitor>,
    delivery: Arc<WebhookDeliveryEngine>,
    event_bus: Arc<dyn EventBus>,
    transactions: Arc<dyn TransactionRepository>,
    alerts: Arc<AlertDispatcher>,
    monitor_pool: Arc<BoundedPool>,
    webhook_pool: Arc<BoundedPool>,
    default_pool: Arc<BoundedPool>,
    config: SchedulerConfig,
) {
    tokio::spawn(monitor_loop(monitor, alerts.clone(), monitor_pool, config.monitor_interval));
    tokio::spawn(retry_loop(
        delivery.clone(),
        alerts.clone(),
        webhook_pool.clone(),
        config.retry_poll_interval,
        config.retry_batch_size,
    ));
    tokio::spawn(hang_sweep_loop(
        delivery.clone(),
        alerts.clone(),
        config.hang_sweep_interval,
        config.hang_sweep_batch_size,
    ));
    tokio::spawn(cleanup_loop(
        delivery.clone(),
        alerts.clone(),
        config.cleanup_sweep_interval,
        config.cleanup_batch_size,
    ));
    tokio::spawn(transaction_events_consumer(
        event_bus.clone(),
        transactions,
        delivery.clone(),
        alerts.clone(),
        default_pool,
        config.transaction_events_poll_interval,
        config.transaction_events_batch_size,
    ));
    tokio::spawn(webhook_events_consumer(
        event_bus,
        delivery,
        alerts,
        webhook_pool,
        config.webhook_events_poll_interval,
        config.webhook_events_batch_size,
    ));
}

async fn monitor_loop(monitor: Arc<Monitor>, alerts: Arc<AlertDispatcher>, pool: Arc<BoundedPool>, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        match pool.run(monitor.run_sweep()).await {
            Ok(pass) => {
                tracing::info!(
                    processed = pass.processed,
                    reconciled = pass.reconciled,
                    manual_intervention_required = pass.manual_intervention_required,
                    "monitor sweep completed"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "monitor sweep failed");
                alerts.send_critical_error_alert(&e.into(), "monitor sweep").await;
            }
        }
    }
}

async fn retry_loop(
    engine: Arc<WebhookDeliveryEngine>,
    alerts: Arc<AlertDispatcher>,
    pool: Arc<BoundedPool>,
    period: Duration,
    batch_size: i64,
) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let due = match engine.due_retries(batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "failed to list due webhook retries");
                alerts.send_critical_error_alert(&e.into(), "webhook retry poll").await;
                continue;
            }
        };
        let mut tasks = tokio::task::JoinSet::new();
        for delivery in due {
            let engine = engine.clone();
            let pool = pool.clone();
            tasks.spawn(async move { pool.run(engine.attempt_delivery(delivery.id)).await });
        }
        while let Some(result) = tasks.join_next().await {
            if let Ok(Err(e)) = result {
                tracing::warn!(error = %e, "webhook retry attempt failed");
            }
        }
    }
}

async fn hang_sweep_loop(engine: Arc<WebhookDeliveryEngine>, alerts: Arc<AlertDispatcher>, period: Duration, batch_size: i64) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        match engine.sweep_hung(batch_size).await {
            Ok(count) if count > 0 => tracing::info!(count, "swept hung webhook deliveries"),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "hang sweep failed");
                alerts.send_critical_error_alert(&e.into(), "webhook hang sweep").await;
            }
        }
    }
}

async fn cleanup_loop(engine: Arc<WebhookDeliveryEngine>, alerts: Arc<AlertDispatcher>, period: Duration, batch_size: i64) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        match engine.sweep_stale_terminal(batch_size).await {
            Ok(count) if count > 0 => tracing::info!(count, "archived stale terminal webhook deliveries"),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "cleanup sweep failed");
                alerts.send_critical_error_alert(&e.into(), "webhook cleanup sweep").await;
            }
        }
    }
}

/// Polls the transaction-events topic and expands each state change into
/// one webhook delivery row per matching subscription plus the
/// transaction's inline URL, if any. Acks on success; on failure the
/// envelope is nacked so it is redelivered on the next poll.
async fn transaction_events_consumer(
    event_bus: Arc<dyn EventBus>,
    transactions: Arc<dyn TransactionRepository>,
    delivery: Arc<WebhookDeliveryEngine>,
    alerts: Arc<AlertDispatcher>,
    pool: Arc<BoundedPool>,
    period: Duration,
    batch_size: i64,
) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let envelopes = match event_bus.poll(TRANSACTION_EVENTS_TOPIC, batch_size).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                tracing::error!(error = %e, "failed to poll transaction-events topic");
                alerts.send_critical_error_alert(&e.into(), "transaction-events poll").await;
                continue;
            }
        };

        for envelope in envelopes {
            let event_bus = event_bus.clone();
            let transactions = transactions.clone();
            let delivery = delivery.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                let envelope_id = envelope.id;
                match fan_out_for_envelope(envelope, &transactions, &delivery, &pool).await {
                    Ok(()) => {
                        if let Err(e) = event_bus.ack(envelope_id).await {
                            tracing::error!(error = %e, %envelope_id, "failed to ack transaction event");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, %envelope_id, "transaction event fan-out failed, nacking for redelivery");
                        if let Err(e) = event_bus.nack(envelope_id).await {
                            tracing::error!(error = %e, %envelope_id, "failed to nack transaction event");
                        }
                    }
                }
            });
        }
    }
}

async fn fan_out_for_envelope(
    envelope: EventEnvelope,
    transactions: &Arc<dyn TransactionRepository>,
    delivery: &Arc<WebhookDeliveryEngine>,
    pool: &Arc<BoundedPool>,
) -> AppResult<()> {
    let event_type: EventType = serde_json::from_value(JsonValue::String(envelope.event_type.clone()))
        .map_err(|e| AppError::Internal(format!("unrecognized transaction event type {}: {e}", envelope.event_type)))?;

    let transaction_id: Uuid = envelope
        .payload
        .get("transactionId")
        .and_then(JsonValue::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| AppError::Internal("transaction event missing transactionId".to_string()))?;

    let previous_status = envelope
        .payload
        .get("previousStatus")
        .and_then(JsonValue::as_str)
        .and_then(|s| serde_json::from_value::<TransactionStatus>(JsonValue::String(s.to_string())).ok());

    let Some(transaction) = transactions.find_by_id(transaction_id).await? else {
        tracing::warn!(%transaction_id, "transaction event references a transaction that no longer exists, dropping");
        return Ok(());
    };

    pool.run(delivery.fan_out(&transaction, event_type, previous_status)).await?;
    Ok(())
}

/// Polls the webhook-events topic and runs the first delivery attempt
/// for each envelope (the envelope id doubles as the `WebhookDelivery`
/// primary key). Subsequent attempts are driven by `retry_loop` instead.
async fn webhook_events_consumer(
    event_bus: Arc<dyn EventBus>,
    delivery: Arc<WebhookDeliveryEngine>,
    alerts: Arc<AlertDispatcher>,
    pool: Arc<BoundedPool>,
    period: Duration,
    batch_size: i64,
) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let envelopes = match event_bus.poll(WEBHOOK_EVENTS_TOPIC, batch_size).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                tracing::error!(error = %e, "failed to poll webhook-events topic");
                alerts.send_critical_error_alert(&e.into(), "webhook-events poll").await;
                continue;
            }
        };

        for envelope in envelopes {
            let event_bus = event_bus.clone();
            let delivery = delivery.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                match pool.run(delivery.attempt_delivery(envelope.id)).await {
                    Ok(()) => {
                        if let Err(e) = event_bus.ack(envelope.id).await {
                            tracing::error!(error = %e, envelope_id = %envelope.id, "failed to ack webhook event");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, envelope_id = %envelope.id, "initial webhook delivery attempt failed, nacking for redelivery");
                        if let Err(e) = event_bus.nack(envelope.id).await {
                            tracing::error!(error = %e, envelope_id = %envelope.id, "failed to nack webhook event");
                        }
                    }
                }
            });
        }
    }
}
