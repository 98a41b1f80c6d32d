//! Admin facade: the operations an external REST/admin surface calls into.
//! Contracts only — no HTTP routing lives here.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::metrics::MetricsSnapshot;
use crate::models::{
    NewSubscription, Transaction, TransactionHistoryEntry, TransactionRequest, TransactionStatus, WebhookDelivery,
    WebhookSubscription,
};
use crate::monitor::{Monitor, ReconciliationPass};
use crate::repositories::{DeliveryRepository, HistoryRepository, TransactionRepository};
use crate::services::subscription_registry::SubscriptionRegistry;
use crate::services::transaction_service::TransactionService;
use crate::services::webhook_delivery::WebhookDeliveryEngine;

pub struct AdminFacade {
    transactions: Arc<dyn TransactionRepository>,
    history: Arc<dyn HistoryRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    transaction_service: Arc<TransactionService>,
    subscriptions: Arc<SubscriptionRegistry>,
    delivery_engine: Arc<WebhookDeliveryEngine>,
    monitor: Arc<Monitor>,
    metrics: Arc<crate::metrics::Metrics>,
}

impl AdminFacade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        history: Arc<dyn HistoryRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        transaction_service: Arc<TransactionService>,
        subscriptions: Arc<SubscriptionRegistry>,
        delivery_engine: Arc<WebhookDeliveryEngine>,
        monitor: Arc<Monitor>,
        metrics: Arc<crate::metrics::Metrics>,
    ) -> Self {
        Self {
            transactions,
            history,
            deliveries,
            transaction_service,
            subscriptions,
            delivery_engine,
            monitor,
            metrics,
        }
    }

    // ---- Transaction ----

    pub async fn create_transaction(&self, request: TransactionRequest) -> AppResult<Transaction> {
        self.transaction_service.process(request).await
    }

    pub async fn get_transaction(&self, id: Uuid) -> AppResult<Transaction> {
        self.transactions.find_by_id(id).await?.ok_or_else(|| AppError::NotFound(format!("transaction {id}")))
    }

    pub async fn update_transaction_status(
        &self,
        id: Uuid,
        new_status: TransactionStatus,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> AppResult<Transaction> {
        self.transaction_service.update_status(id, new_status, reason, actor).await
    }

    pub async fn get_transaction_history(&self, id: Uuid) -> AppResult<Vec<TransactionHistoryEntry>> {
        self.history.list_for_transaction(id).await
    }

    /// Operator override that bypasses the automatic-transition checks.
    pub async fn resolve_transaction(
        &self,
        id: Uuid,
        target_status: TransactionStatus,
        notes: impl Into<String>,
        admin_user: impl Into<String>,
    ) -> AppResult<Transaction> {
        self.transaction_service.manually_handle(id, target_status, notes, admin_user).await
    }

    // ---- Subscription ----

    pub async fn register_subscription(&self, new: NewSubscription) -> AppResult<WebhookSubscription> {
        self.subscriptions.register(new).await
    }

    pub async fn get_subscription(&self, id: Uuid) -> AppResult<WebhookSubscription> {
        self.subscriptions.find_by_id(id).await?.ok_or_else(|| AppError::NotFound(format!("subscription {id}")))
    }

    pub async fn list_subscriptions(&self, limit: i64) -> AppResult<Vec<WebhookSubscription>> {
        self.subscriptions.list_all(limit).await
    }

    /// The only mutable subscription field besides registration details
    /// is its active flag; "update" in the admin surface means toggling it.
    pub async fn set_subscription_active(&self, id: Uuid, active: bool) -> AppResult<WebhookSubscription> {
        self.subscriptions.set_active(id, active).await
    }

    pub async fn delete_subscription(&self, id: Uuid) -> AppResult<()> {
        self.subscriptions.delete(id).await
    }

    // ---- Deliveries ----

    pub async fn list_deliveries_for_transaction(&self, transaction_id: Uuid) -> AppResult<Vec<WebhookDelivery>> {
        self.deliveries.list_for_transaction(transaction_id).await
    }

    pub async fn retry_delivery(&self, delivery_id: Uuid) -> AppResult<()> {
        self.delivery_engine.attempt_delivery(delivery_id).await
    }

    /// Handles a subscriber's `POST /api/webhooks/acknowledge` callback.
    pub async fn acknowledge_delivery(&self, event_id: Uuid, status: &str) -> AppResult<()> {
        self.deliveries.mark_acknowledged(event_id, status).await
    }

    // ---- Monitor / reconciliation ----

    pub async fn trigger_monitor_sweep(&self) -> AppResult<ReconciliationPass> {
        self.monitor.run_sweep().await
    }

    pub async fn trigger_reconciliation(&self, id: Uuid) -> AppResult<Transaction> {
        self.transaction_service.reconcile(id).await
    }

    // ---- Metrics & statistics ----

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_prometheus(&self) -> String {
        self.metrics.render_prometheus()
    }

    /// Point-in-time operational statistics: the non-terminal backlog and
    /// the un-reconciled problematic count, both bounded scans.
    pub async fn statistics(&self, scan_limit: i64) -> AppResult<JsonValue> {
        let non_terminal = self.transactions.list_non_terminal(scan_limit).await?;
        let problematic = self.transactions.list_unreconciled_problematic(scan_limit).await?;
        Ok(serde_json::json!({
            "nonTerminalCount": non_terminal.len(),
            "unreconciledProblematicCount": problematic.len(),
            "metrics": self.metrics.snapshot(),
        }))
    }
}
