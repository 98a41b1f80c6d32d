//! Application metrics: atomic counters exposed both as a Prometheus
//! text exposition and as a JSON snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Clone)]
pub struct Metrics {
    pub transactions_processed: Arc<AtomicU64>,
    pub transactions_completed: Arc<AtomicU64>,
    pub transactions_failed: Arc<AtomicU64>,
    pub transactions_reconciled: Arc<AtomicU64>,
    pub transactions_timed_out: Arc<AtomicU64>,
    pub deliveries_attempted: Arc<AtomicU64>,
    pub deliveries_delivered: Arc<AtomicU64>,
    pub deliveries_dead_lettered: Arc<AtomicU64>,
    pub anomalies_detected: Arc<AtomicU64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            transactions_processed: Arc::new(AtomicU64::new(0)),
            transactions_completed: Arc::new(AtomicU64::new(0)),
            transactions_failed: Arc::new(AtomicU64::new(0)),
            transactions_reconciled: Arc::new(AtomicU64::new(0)),
            transactions_timed_out: Arc::new(AtomicU64::new(0)),
            deliveries_attempted: Arc::new(AtomicU64::new(0)),
            deliveries_delivered: Arc::new(AtomicU64::new(0)),
            deliveries_dead_lettered: Arc::new(AtomicU64::new(0)),
            anomalies_detected: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Metrics {
    pub fn record_transaction_processed(&self) {
        self.transactions_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_completed(&self) {
        self.transactions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_failed(&self) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_reconciled(&self) {
        self.transactions_reconciled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_timed_out(&self) {
        self.transactions_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_attempted(&self) {
        self.deliveries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_delivered(&self) {
        self.deliveries_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_dead_lettered(&self) {
        self.deliveries_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomalies(&self, count: u64) {
        self.anomalies_detected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions_processed: self.transactions_processed.load(Ordering::Relaxed),
            transactions_completed: self.transactions_completed.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            transactions_reconciled: self.transactions_reconciled.load(Ordering::Relaxed),
            transactions_timed_out: self.transactions_timed_out.load(Ordering::Relaxed),
            deliveries_attempted: self.deliveries_attempted.load(Ordering::Relaxed),
            deliveries_delivered: self.deliveries_delivered.load(Ordering::Relaxed),
            deliveries_dead_lettered: self.deliveries_dead_lettered.load(Ordering::Relaxed),
            anomalies_detected: self.anomalies_detected.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition format for `GET /metrics`.
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            "# HELP txncore_transactions_processed_total Transactions processed\n\
             # TYPE txncore_transactions_processed_total counter\n\
             txncore_transactions_processed_total {}\n\
             # HELP txncore_transactions_completed_total Transactions completed\n\
             # TYPE txncore_transactions_completed_total counter\n\
             txncore_transactions_completed_total {}\n\
             # HELP txncore_transactions_failed_total Transactions failed\n\
             # TYPE txncore_transactions_failed_total counter\n\
             txncore_transactions_failed_total {}\n\
             # HELP txncore_transactions_reconciled_total Transactions reconciled\n\
             # TYPE txncore_transactions_reconciled_total counter\n\
             txncore_transactions_reconciled_total {}\n\
             # HELP txncore_transactions_timed_out_total Transactions timed out\n\
             # TYPE txncore_transactions_timed_out_total counter\n\
             txncore_transactions_timed_out_total {}\n\
             # HELP txncore_deliveries_attempted_total Webhook delivery attempts\n\
             # TYPE txncore_deliveries_attempted_total counter\n\
             txncore_deliveries_attempted_total {}\n\
             # HELP txncore_deliveries_delivered_total Webhook deliveries that succeeded\n\
             # TYPE txncore_deliveries_delivered_total counter\n\
             txncore_deliveries_delivered_total {}\n\
             # HELP txncore_deliveries_dead_lettered_total Webhook deliveries permanently failed\n\
             # TYPE txncore_deliveries_dead_lettered_total counter\n\
             txncore_deliveries_dead_lettered_total {}\n\
             # HELP txncore_anomalies_detected_total Anomaly detector hits\n\
             # TYPE txncore_anomalies_detected_total counter\n\
             txncore_anomalies_detected_total {}\n",
            s.transactions_processed,
            s.transactions_completed,
            s.transactions_failed,
            s.transactions_reconciled,
            s.transactions_timed_out,
            s.deliveries_attempted,
            s.deliveries_delivered,
            s.deliveries_dead_lettered,
            s.anomalies_detected,
        )
    }
}

async fn metrics_endpoint(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.render_prometheus()
}

async fn metrics_json(State(metrics): State<Arc<Metrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Mounted under `/monitoring` alongside the health router.
pub fn router() -> Router<Arc<Metrics>> {
    Router::new()
        .route("/metrics", get(metrics_endpoint))
        .route("/metrics/json", get(metrics_json))
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub transactions_processed: u64,
    pub transactions_completed: u64,
    pub transactions_failed: u64,
    pub transactions_reconciled: u64,
    pub transactions_timed_out: u64,
    pub deliveries_attempted: u64,
    pub deliveries_delivered: u64,
    pub deliveries_dead_lettered: u64,
    pub anomalies_detected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let metrics = Metrics::default();
        metrics.record_transaction_processed();
        metrics.record_transaction_processed();
        metrics.record_delivery_delivered();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transactions_processed, 2);
        assert_eq!(snapshot.deliveries_delivered, 1);
    }
}
