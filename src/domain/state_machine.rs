//! Transaction state machine: legal automatic transitions, timeout
//! detection and retry eligibility.

use std::collections::HashSet;

use chrono::Duration;
use thiserror::Error;

use crate::models::TransactionStatus;

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("{from:?} -> {to:?} is not a legal automatic transition")]
    IllegalAutomaticTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
}

/// Default time a `Pending` row may sit before the monitor marks it
/// `Timeout`.
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::minutes(5);
/// Default time a `Processing` row may sit without a fresh attempt
/// before the monitor marks it `Timeout`.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::minutes(10);
/// A `Timeout` transaction older than this is no longer automatically
/// retry-eligible.
pub const DEFAULT_TIMEOUT_RETRY_WINDOW: Duration = Duration::minutes(30);

/// Enforces the transaction lifecycle's legal automatic transitions.
/// Manual/operator overrides bypass this table entirely — any pair of
/// statuses is reachable by a manual override, audited via history.
pub struct TransactionStateMachine {
    legal_automatic: HashSet<(TransactionStatus, TransactionStatus)>,
}

impl Default for TransactionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStateMachine {
    pub fn new() -> Self {
        use TransactionStatus::*;

        let mut legal_automatic = HashSet::new();
        let mut add = |from: TransactionStatus, tos: &[TransactionStatus]| {
            for to in tos {
                legal_automatic.insert((from, *to));
            }
        };

        add(Pending, &[Processing, Completed, Failed, Timeout, Inconsistent]);
        add(Processing, &[Completed, Failed, Timeout, Inconsistent]);
        add(
            Timeout,
            &[Pending, Completed, Failed, Inconsistent, PermanentlyFailed],
        );
        add(Inconsistent, &[Pending, Completed, Failed, PermanentlyFailed]);
        // Failed, Completed, PermanentlyFailed are terminal: no outbound
        // automatic transitions are registered for them.

        Self { legal_automatic }
    }

    pub fn is_legal_automatic(&self, from: TransactionStatus, to: TransactionStatus) -> bool {
        self.legal_automatic.contains(&(from, to))
    }

    pub fn validate_automatic(
        &self,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> Result<(), StateMachineError> {
        if self.is_legal_automatic(from, to) {
            Ok(())
        } else {
            Err(StateMachineError::IllegalAutomaticTransition { from, to })
        }
    }

    /// Manual overrides are permitted between any pair of statuses; the
    /// caller is responsible for recording the audit trail.
    pub fn validate_manual(&self, _from: TransactionStatus, _to: TransactionStatus) -> Result<(), StateMachineError> {
        Ok(())
    }

    pub fn possible_automatic_transitions(&self, from: TransactionStatus) -> Vec<TransactionStatus> {
        self.legal_automatic
            .iter()
            .filter_map(|(f, t)| if *f == from { Some(*t) } else { None })
            .collect()
    }
}

/// Whether a `Pending` row has been sitting long enough to be marked
/// `Timeout`. `age` is `now - created_at`.
pub fn is_pending_timed_out(age: Duration, threshold: Duration) -> bool {
    age > threshold
}

/// Whether a `Processing` row has been sitting long enough, counting
/// from the last attempt (or creation, if there was none), to be marked
/// `Timeout`.
pub fn is_processing_timed_out(idle: Duration, threshold: Duration) -> bool {
    idle > threshold
}

/// Retry eligibility per status, ignoring the idempotency resolver —
/// terminal statuses and exhausted attempt budgets are never eligible;
/// `Inconsistent` is never automatically retried; `Timeout` is eligible
/// only while still within the retry window; `Pending` is always
/// eligible; `Processing` only once it has timed out.
pub fn is_retry_eligible(
    status: TransactionStatus,
    attempt_count: i32,
    max_attempts: i32,
    age: Duration,
    is_timed_out: bool,
) -> bool {
    if status.is_terminal() {
        return false;
    }
    if attempt_count >= max_attempts {
        return false;
    }
    match status {
        TransactionStatus::Pending => true,
        TransactionStatus::Processing => is_timed_out,
        TransactionStatus::Timeout => age < DEFAULT_TIMEOUT_RETRY_WINDOW,
        TransactionStatus::Inconsistent => false,
        TransactionStatus::Completed
        | TransactionStatus::Failed
        | TransactionStatus::PermanentlyFailed => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn pending_can_reach_any_observed_outcome() {
        let machine = TransactionStateMachine::new();
        for to in [Processing, Completed, Failed, Timeout, Inconsistent] {
            assert!(machine.is_legal_automatic(Pending, to), "{to:?}");
        }
        assert!(!machine.is_legal_automatic(Pending, PermanentlyFailed));
    }

    #[test]
    fn terminal_statuses_have_no_automatic_transitions() {
        let machine = TransactionStateMachine::new();
        for from in [Completed, Failed, PermanentlyFailed] {
            assert!(machine.possible_automatic_transitions(from).is_empty());
        }
    }

    #[test]
    fn timeout_can_recover_to_pending_or_go_permanently_failed() {
        let machine = TransactionStateMachine::new();
        assert!(machine.is_legal_automatic(Timeout, Pending));
        assert!(machine.is_legal_automatic(Timeout, PermanentlyFailed));
    }

    #[test]
    fn manual_override_allows_any_pair() {
        let machine = TransactionStateMachine::new();
        assert!(machine.validate_manual(Completed, Pending).is_ok());
        assert!(machine.validate_manual(Failed, Processing).is_ok());
    }

    #[test]
    fn retry_eligibility_rules() {
        assert!(is_retry_eligible(Pending, 1, 5, Duration::seconds(1), false));
        assert!(!is_retry_eligible(Completed, 1, 5, Duration::seconds(1), false));
        assert!(!is_retry_eligible(Pending, 5, 5, Duration::seconds(1), false));
        assert!(!is_retry_eligible(Processing, 1, 5, Duration::seconds(1), false));
        assert!(is_retry_eligible(Processing, 1, 5, Duration::minutes(11), true));
        assert!(!is_retry_eligible(Inconsistent, 1, 5, Duration::seconds(1), false));
        assert!(is_retry_eligible(Timeout, 1, 5, Duration::minutes(10), false));
        assert!(!is_retry_eligible(Timeout, 1, 5, Duration::minutes(31), false));
    }
}
