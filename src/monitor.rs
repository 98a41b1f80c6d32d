//! Periodic sweep for stalled/timed-out transactions, reconciliation,
//! retry bumping, and anomaly detection, grounded on the same
//! ticker-loop shape used for other background schedulers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::reconciliation::reconcile as reconcile_heuristic;
use crate::domain::state_machine::{is_pending_timed_out, is_processing_timed_out, is_retry_eligible};
use crate::errors::AppResult;
use crate::metrics::Metrics;
use crate::models::history::ACTOR_SYSTEM_MONITOR;
use crate::models::{Transaction, TransactionHistoryEntry, TransactionStatus};
use crate::repositories::{HistoryRepository, TransactionRepository};
use crate::services::alert_dispatcher::AlertDispatcher;
use crate::services::transaction_service::TransactionService;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub pending_timeout: Duration,
    pub processing_timeout: Duration,
    pub anomaly_pending_threshold: Duration,
    pub anomaly_processing_threshold: Duration,
    pub anomaly_retry_threshold: i32,
    pub anomaly_state_change_threshold: i64,
    pub sweep_batch_size: i64,
}

/// Result of a full `ReconciliationPass`: counts over the non-terminal
/// rows a single sweep examined.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconciliationPass {
    pub processed: i64,
    pub reconciled: i64,
    pub manual_intervention_required: i64,
}

/// A single transaction that tripped one or more anomaly detectors.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyHit {
    pub transaction_id: Uuid,
    pub detectors: Vec<&'static str>,
    pub last_updated: DateTime<Utc>,
}

pub struct Monitor {
    transactions: Arc<dyn TransactionRepository>,
    history: Arc<dyn HistoryRepository>,
    service: Arc<TransactionService>,
    alerts: Arc<AlertDispatcher>,
    metrics: Arc<Metrics>,
    config: MonitorConfig,
    /// Advisory single-flag guard so a slow tick never overlaps the next.
    sweep_running: AtomicBool,
}

impl Monitor {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        history: Arc<dyn HistoryRepository>,
        service: Arc<TransactionService>,
        alerts: Arc<AlertDispatcher>,
        metrics: Arc<Metrics>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            transactions,
            history,
            service,
            alerts,
            metrics,
            config,
            sweep_running: AtomicBool::new(false),
        }
    }

    /// Runs one full sweep: stalled-timeout detection, reconciliation of
    /// un-reconciled problematic rows, retry-eligible bumping, and anomaly
    /// detection. Skips entirely (returning a zeroed pass) if a previous
    /// sweep is still in flight.
    pub async fn run_sweep(&self) -> AppResult<ReconciliationPass> {
        if self
            .sweep_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("monitor sweep already in progress, skipping this tick");
            return Ok(ReconciliationPass::default());
        }

        let result = self.run_sweep_inner().await;
        self.sweep_running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_sweep_inner(&self) -> AppResult<ReconciliationPass> {
        let mut pass = ReconciliationPass::default();

        let non_terminal = self.transactions.list_non_terminal(self.config.sweep_batch_size).await?;
        pass.processed = non_terminal.len() as i64;

        for transaction in &non_terminal {
            if let Err(e) = self.sweep_one(transaction).await {
                tracing::error!(error = %e, transaction_id = %transaction.id, "monitor sweep step failed");
            }
        }

        let problematic = self
            .transactions
            .list_unreconciled_problematic(self.config.sweep_batch_size)
            .await?;
        for transaction in &problematic {
            match self.service.reconcile(transaction.id).await {
                Ok(reconciled) => {
                    pass.reconciled += 1;
                    if reconciled.status.is_problematic() {
                        pass.manual_intervention_required += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, transaction_id = %transaction.id, "reconciliation failed");
                }
            }
        }

        let terminal_missing_payload = self
            .transactions
            .list_terminal_missing_payload(self.config.sweep_batch_size)
            .await?;

        if let Err(e) = self.detect_anomalies(&non_terminal, &terminal_missing_payload).await {
            tracing::error!(error = %e, "anomaly detection failed");
        }

        Ok(pass)
    }

    async fn sweep_one(&self, transaction: &Transaction) -> AppResult<()> {
        match transaction.status {
            TransactionStatus::Pending => {
                if is_pending_timed_out(transaction.age(), self.config.pending_timeout) {
                    self.service
                        .transition_automatic(
                            transaction.id,
                            TransactionStatus::Timeout,
                            "stalled in pending",
                            ACTOR_SYSTEM_MONITOR,
                        )
                        .await?;
                    return Ok(());
                }
            }
            TransactionStatus::Processing => {
                if is_processing_timed_out(transaction.idle_duration(), self.config.processing_timeout) {
                    let history = self.history.list_for_transaction(transaction.id).await?;
                    let determined = reconcile_heuristic(transaction, &history);
                    if determined != TransactionStatus::Processing {
                        self.service
                            .transition_automatic(
                                transaction.id,
                                determined,
                                "reconciled from stalled processing",
                                ACTOR_SYSTEM_MONITOR,
                            )
                            .await?;
                    } else {
                        self.service
                            .transition_automatic(
                                transaction.id,
                                TransactionStatus::Timeout,
                                "stalled in processing",
                                ACTOR_SYSTEM_MONITOR,
                            )
                            .await?;
                    }
                    return Ok(());
                }
            }
            _ => {}
        }

        // Not timed out (the arms above already handled and returned for
        // a stalled row), so `is_timed_out` is always false here.
        if is_retry_eligible(
            transaction.status,
            transaction.attempt_count,
            self.service.max_attempts(),
            transaction.age(),
            false,
        ) {
            self.service.retry(transaction.id).await?;
        }

        Ok(())
    }

    async fn detect_anomalies(
        &self,
        non_terminal: &[Transaction],
        terminal_missing_payload: &[Transaction],
    ) -> AppResult<()> {
        let mut hits = Vec::new();

        for transaction in non_terminal.iter().chain(terminal_missing_payload.iter()) {
            let history = self.history.list_for_transaction(transaction.id).await?;
            let detectors = self.matched_detectors(transaction, &history);
            if !detectors.is_empty() {
                hits.push(AnomalyHit {
                    transaction_id: transaction.id,
                    detectors,
                    last_updated: transaction.updated_at,
                });
            }
        }

        if hits.is_empty() {
            return Ok(());
        }

        self.metrics.record_anomalies(hits.len() as u64);

        hits.sort_by(|a, b| {
            b.detectors
                .len()
                .cmp(&a.detectors.len())
                .then_with(|| b.last_updated.cmp(&a.last_updated))
        });

        self.alerts
            .send_system_health_alert(&serde_json::json!({"anomalies": hits.len()}), hits.len())
            .await;

        for hit in &hits {
            self.alerts
                .send_transaction_alert(hit.transaction_id, "anomalous", &hit.detectors.join(", "))
                .await;
        }

        Ok(())
    }

    fn matched_detectors(&self, transaction: &Transaction, history: &[TransactionHistoryEntry]) -> Vec<&'static str> {
        let mut matched = Vec::new();

        if transaction.status == TransactionStatus::Pending
            && is_pending_timed_out(transaction.age(), self.config.anomaly_pending_threshold)
        {
            matched.push("pending-age");
        }
        if transaction.status == TransactionStatus::Processing
            && is_processing_timed_out(transaction.idle_duration(), self.config.anomaly_processing_threshold)
        {
            matched.push("processing-idle");
        }
        if !transaction.status.is_terminal() && transaction.attempt_count >= self.config.anomaly_retry_threshold {
            matched.push("retry-count");
        }
        if (history.len() as i64) >= self.config.anomaly_state_change_threshold {
            matched.push("history-length");
        }
        if has_oscillation(history) {
            matched.push("oscillation");
        }
        if transaction.status == TransactionStatus::Completed && transaction.response.is_none() {
            matched.push("completed-without-response");
        }
        if transaction.status == TransactionStatus::Failed && transaction.error_details.is_none() {
            matched.push("failed-without-error-details");
        }
        if matches!(transaction.status, TransactionStatus::Inconsistent | TransactionStatus::Timeout)
            && !transaction.is_reconciled
        {
            matched.push("unreconciled-problematic");
        }

        matched
    }
}

fn has_oscillation(history: &[TransactionHistoryEntry]) -> bool {
    use std::collections::HashMap;
    let mut counts: HashMap<(Option<TransactionStatus>, TransactionStatus), i32> = HashMap::new();
    for entry in history {
        let count = counts.entry((entry.previous_status, entry.new_status)).or_insert(0);
        *count += 1;
        if *count > 2 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oscillation_requires_more_than_two_identical_transitions() {
        let entry = |from: TransactionStatus, to: TransactionStatus| TransactionHistoryEntry {
            id: 1,
            transaction_id: Uuid::new_v4(),
            previous_status: Some(from),
            new_status: to,
            changed_at: Utc::now(),
            reason: "x".into(),
            changed_by: "SYSTEM".into(),
            context: None,
            attempt_number: 1,
            is_automatic: true,
        };

        let two = vec![
            entry(TransactionStatus::Pending, TransactionStatus::Processing),
            entry(TransactionStatus::Pending, TransactionStatus::Processing),
        ];
        assert!(!has_oscillation(&two));

        let three = vec![
            entry(TransactionStatus::Pending, TransactionStatus::Processing),
            entry(TransactionStatus::Pending, TransactionStatus::Processing),
            entry(TransactionStatus::Pending, TransactionStatus::Processing),
        ];
        assert!(has_oscillation(&three));
    }
}
