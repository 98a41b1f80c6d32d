//! Reconciliation heuristic: determine a transaction's true outcome
//! from partial or ambiguous evidence (stuck rows, inconsistent state).

use chrono::Duration;

use crate::models::{Transaction, TransactionHistoryEntry, TransactionStatus};

use super::state_machine::{
    is_pending_timed_out, is_processing_timed_out, DEFAULT_PENDING_TIMEOUT,
    DEFAULT_PROCESSING_TIMEOUT,
};

fn mentions(text: &str, needle: &str) -> bool {
    text.to_lowercase().contains(needle)
}

fn history_contains_status(history: &[TransactionHistoryEntry], status: TransactionStatus) -> bool {
    history.iter().any(|h| h.new_status == status)
}

fn last_non_inconsistent_status(history: &[TransactionHistoryEntry]) -> Option<TransactionStatus> {
    history
        .iter()
        .rev()
        .map(|h| h.new_status)
        .find(|s| *s != TransactionStatus::Inconsistent)
}

/// Applies the priority-ordered reconciliation heuristic to a
/// transaction given its history, returning the status it should be
/// moved to (which may be its current status, meaning no change).
pub fn reconcile(transaction: &Transaction, history: &[TransactionHistoryEntry]) -> TransactionStatus {
    if transaction.status.is_terminal() {
        return transaction.status;
    }

    let age = transaction.age();
    let idle = transaction.idle_duration();
    let timed_out = match transaction.status {
        TransactionStatus::Pending => is_pending_timed_out(age, DEFAULT_PENDING_TIMEOUT),
        TransactionStatus::Processing => is_processing_timed_out(idle, DEFAULT_PROCESSING_TIMEOUT),
        _ => false,
    };
    if timed_out {
        return TransactionStatus::Timeout;
    }

    let text_evidence = history
        .iter()
        .filter_map(|h| h.context.as_ref().map(|c| c.to_string()))
        .chain(history.iter().map(|h| h.reason.clone()))
        .collect::<Vec<_>>()
        .join(" ");

    if history_contains_status(history, TransactionStatus::Completed) || mentions(&text_evidence, "complet") {
        return TransactionStatus::Completed;
    }
    if history_contains_status(history, TransactionStatus::Failed)
        || mentions(&text_evidence, "fail")
        || mentions(&text_evidence, "error")
    {
        return TransactionStatus::Failed;
    }

    if transaction.status == TransactionStatus::Inconsistent {
        if transaction.response.is_some() {
            return TransactionStatus::Completed;
        }
        if transaction.error_details.is_some() {
            return TransactionStatus::Failed;
        }
        if transaction.attempt_count >= 3 {
            return TransactionStatus::Failed;
        }
        if age < Duration::minutes(1) {
            return TransactionStatus::Pending;
        }
        if age > Duration::minutes(30) {
            return TransactionStatus::Inconsistent;
        }
        if let Some(prior) = last_non_inconsistent_status(history) {
            return prior;
        }
    }

    transaction.status
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn base_transaction(status: TransactionStatus) -> Transaction {
        let mut txn = Transaction::new(Uuid::new_v4(), "A".to_string(), json!({}));
        txn.status = status;
        txn
    }

    #[test]
    fn terminal_status_never_changes() {
        let txn = base_transaction(TransactionStatus::Completed);
        assert_eq!(reconcile(&txn, &[]), TransactionStatus::Completed);
    }

    #[test]
    fn history_with_completed_entry_reconciles_to_completed() {
        let txn = base_transaction(TransactionStatus::Inconsistent);
        let history = vec![TransactionHistoryEntry {
            id: 1,
            transaction_id: txn.id,
            previous_status: Some(TransactionStatus::Processing),
            new_status: TransactionStatus::Completed,
            changed_at: chrono::Utc::now(),
            reason: "observed settlement".to_string(),
            changed_by: "SYSTEM".to_string(),
            context: None,
            attempt_number: 1,
            is_automatic: true,
        }];
        assert_eq!(reconcile(&txn, &history), TransactionStatus::Completed);
    }

    #[test]
    fn inconsistent_with_response_reconciles_to_completed() {
        let mut txn = base_transaction(TransactionStatus::Inconsistent);
        txn.response = Some(json!({"status": "ok"}));
        txn.created_at = chrono::Utc::now() - Duration::minutes(5);
        assert_eq!(reconcile(&txn, &[]), TransactionStatus::Completed);
    }

    #[test]
    fn inconsistent_young_row_reconciles_to_pending() {
        let txn = base_transaction(TransactionStatus::Inconsistent);
        assert_eq!(reconcile(&txn, &[]), TransactionStatus::Pending);
    }

    #[test]
    fn inconsistent_old_row_with_no_evidence_stays_inconsistent() {
        let mut txn = base_transaction(TransactionStatus::Inconsistent);
        txn.created_at = chrono::Utc::now() - Duration::minutes(45);
        txn.last_attempt_at = Some(txn.created_at);
        assert_eq!(reconcile(&txn, &[]), TransactionStatus::Inconsistent);
    }
}
