//! Transaction lifecycle: create, retry, recover, update status,
//! complete, fail, reconcile, manual override. Every state change
//! writes a history row and emits an event; event publication is
//! best-effort and never rolls back the underlying row update.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::domain::reconciliation::reconcile as reconcile_heuristic;
use crate::domain::state_machine::TransactionStateMachine;
use crate::errors::{AppError, AppResult};
use crate::eventbus::EventBus;
use crate::idempotency::{self, IdempotencyConfig, IdempotencyOutcome};
use crate::metrics::Metrics;
use crate::models::history::ACTOR_SYSTEM_RECONCILIATION;
use crate::models::{EventType, NewHistoryEntry, Transaction, TransactionRequest, TransactionStatus};
use crate::repositories::{HistoryRepository, TransactionRepository};

pub const TRANSACTION_EVENTS_TOPIC: &str = "transaction-events";

pub struct TransactionService {
    transactions: Arc<dyn TransactionRepository>,
    history: Arc<dyn HistoryRepository>,
    event_bus: Arc<dyn EventBus>,
    state_machine: TransactionStateMachine,
    idempotency_config: IdempotencyConfig,
    max_attempts: i32,
    metrics: Arc<Metrics>,
}

impl TransactionService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        history: Arc<dyn HistoryRepository>,
        event_bus: Arc<dyn EventBus>,
        idempotency_config: IdempotencyConfig,
        max_attempts: i32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transactions,
            history,
            event_bus,
            state_machine: TransactionStateMachine::new(),
            idempotency_config,
            max_attempts,
            metrics,
        }
    }

    async fn emit(&self, event_type: EventType, transaction: &Transaction, previous: Option<TransactionStatus>) {
        let payload = json!({
            "eventId": Uuid::new_v4(),
            "eventType": event_type.as_str(),
            "transactionId": transaction.id,
            "originSystem": transaction.origin_system,
            "currentStatus": transaction.status.as_str(),
            "previousStatus": previous.map(|s| s.as_str()),
            "payload": transaction.payload,
            "highPriority": matches!(event_type, EventType::SystemAlert | EventType::TransactionInconsistent),
        });

        if let Err(e) = self
            .event_bus
            .publish(TRANSACTION_EVENTS_TOPIC, &transaction.id.to_string(), event_type.as_str(), payload)
            .await
        {
            tracing::warn!(error = %e, transaction_id = %transaction.id, "failed to publish transaction event");
        }
    }

    /// Processes an incoming submission. Inserts a new row if none
    /// exists; otherwise branches on the existing row's status.
    pub async fn process(&self, request: TransactionRequest) -> AppResult<Transaction> {
        let existing = self.transactions.find_by_id(request.id).await?;

        let Some(existing) = existing else {
            let payload = JsonValue::Object(request.payload.clone().into_iter().collect());
            let created = self
                .transactions
                .insert_pending(request.id, &request.origin_system, payload, request.webhook_url.as_deref())
                .await?;
            self.history
                .append(NewHistoryEntry::automatic(
                    created.id,
                    None,
                    TransactionStatus::Pending,
                    "transaction created",
                    1,
                ))
                .await?;
            self.emit(EventType::TransactionCreated, &created, None).await;
            self.metrics.record_transaction_processed();
            return Ok(created);
        };

        if existing.status.is_terminal() {
            return Ok(existing);
        }

        match existing.status {
            TransactionStatus::Pending | TransactionStatus::Processing => {
                if request.retry {
                    return self.retry(existing.id).await;
                }
                let existing_map: HashMap<String, JsonValue> = existing
                    .payload
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                match idempotency::classify(
                    &existing.origin_system,
                    &request.origin_system,
                    &existing_map,
                    &request.payload,
                    &self.idempotency_config,
                ) {
                    IdempotencyOutcome::Same | IdempotencyOutcome::New => Ok(existing),
                    IdempotencyOutcome::Conflict => Err(AppError::Conflict(format!(
                        "transaction {} already exists with a conflicting payload",
                        existing.id
                    ))),
                }
            }
            TransactionStatus::Timeout | TransactionStatus::Inconsistent => self.recover(existing.id).await,
            _ => Ok(existing),
        }
    }

    pub async fn retry(&self, id: Uuid) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        if transaction.attempt_count >= self.max_attempts {
            let failed = self
                .transactions
                .update_status(
                    id,
                    transaction.version,
                    TransactionStatus::Failed,
                    None,
                    Some(json!({"reason": "max retries reached"})),
                    Some(crate::ids::now()),
                    None,
                )
                .await?;
            self.history
                .append(NewHistoryEntry::automatic(
                    id,
                    Some(transaction.status),
                    TransactionStatus::Failed,
                    "max retries reached",
                    failed.attempt_count,
                ))
                .await?;
            self.emit(EventType::TransactionFailed, &failed, Some(transaction.status)).await;
            self.metrics.record_transaction_failed();
            return Ok(failed);
        }

        let bumped = self.transactions.bump_attempt(id, transaction.version).await?;
        self.history
            .append(NewHistoryEntry::automatic(
                id,
                Some(transaction.status),
                transaction.status,
                "retry attempt",
                bumped.attempt_count,
            ))
            .await?;
        self.emit(EventType::TransactionRetry, &bumped, Some(transaction.status)).await;
        Ok(bumped)
    }

    /// Resets a `Timeout`/`Inconsistent` row back to `Pending` for
    /// another processing attempt.
    pub async fn recover(&self, id: Uuid) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        let recovered = self
            .transactions
            .update_status(id, transaction.version, TransactionStatus::Pending, None, None, None, None)
            .await?;
        let recovered = self.transactions.bump_attempt(recovered.id, recovered.version).await?;

        self.history
            .append(NewHistoryEntry::automatic(
                id,
                Some(transaction.status),
                TransactionStatus::Pending,
                "recovered for reprocessing",
                recovered.attempt_count,
            ))
            .await?;
        self.emit(EventType::TransactionStatusChanged, &recovered, Some(transaction.status)).await;
        Ok(recovered)
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: TransactionStatus,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        if transaction.status == new_status {
            return Ok(transaction);
        }

        self.state_machine.validate_automatic(transaction.status, new_status)?;

        let updated = self
            .transactions
            .update_status(id, transaction.version, new_status, None, None, None, None)
            .await?;

        self.history
            .append(NewHistoryEntry::manual(
                id,
                Some(transaction.status),
                new_status,
                reason.into(),
                actor.into(),
                updated.attempt_count,
            ))
            .await?;
        self.emit(EventType::TransactionStatusChanged, &updated, Some(transaction.status)).await;
        Ok(updated)
    }

    pub async fn complete(&self, id: Uuid, response: JsonValue, actor: impl Into<String>) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        self.state_machine.validate_automatic(transaction.status, TransactionStatus::Completed)?;

        let updated = self
            .transactions
            .update_status(
                id,
                transaction.version,
                TransactionStatus::Completed,
                Some(response),
                None,
                Some(crate::ids::now()),
                None,
            )
            .await?;

        self.history
            .append(NewHistoryEntry::automatic_as(
                id,
                Some(transaction.status),
                TransactionStatus::Completed,
                "completed",
                actor.into(),
                updated.attempt_count,
            ))
            .await?;
        self.emit(EventType::TransactionCompleted, &updated, Some(transaction.status)).await;
        self.metrics.record_transaction_completed();
        Ok(updated)
    }

    pub async fn fail(
        &self,
        id: Uuid,
        error_details: JsonValue,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        self.state_machine.validate_automatic(transaction.status, TransactionStatus::Failed)?;

        let reason = reason.into();
        let updated = self
            .transactions
            .update_status(
                id,
                transaction.version,
                TransactionStatus::Failed,
                None,
                Some(error_details),
                Some(crate::ids::now()),
                Some(reason.clone()),
            )
            .await?;

        self.history
            .append(NewHistoryEntry::automatic_as(
                id,
                Some(transaction.status),
                TransactionStatus::Failed,
                reason,
                actor.into(),
                updated.attempt_count,
            ))
            .await?;
        self.emit(EventType::TransactionFailed, &updated, Some(transaction.status)).await;
        self.metrics.record_transaction_failed();
        Ok(updated)
    }

    /// Asks the reconciliation heuristic for the transaction's likely
    /// true status and applies it if different, setting the reconciled
    /// flag either way.
    pub async fn reconcile(&self, id: Uuid) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;
        let history = self.history.list_for_transaction(id).await?;

        let determined = reconcile_heuristic(&transaction, &history);

        let result = if determined != transaction.status {
            let updated = self
                .transactions
                .update_status(id, transaction.version, determined, None, None, None, None)
                .await?;
            self.history
                .append(NewHistoryEntry::automatic_as(
                    id,
                    Some(transaction.status),
                    determined,
                    "automatic reconciliation",
                    ACTOR_SYSTEM_RECONCILIATION,
                    updated.attempt_count,
                ))
                .await?;
            self.transactions.mark_reconciled(updated.id, updated.version).await?
        } else {
            self.transactions.mark_reconciled(transaction.id, transaction.version).await?
        };

        self.emit(EventType::TransactionReconciled, &result, Some(transaction.status)).await;
        self.metrics.record_transaction_reconciled();
        Ok(result)
    }

    /// Monitor-driven automatic transition: timeout detection or a
    /// reconciliation-determined status that carries no new response or
    /// error payload of its own. Emits the event matching the target
    /// status rather than a single generic one.
    pub async fn transition_automatic(
        &self,
        id: Uuid,
        target_status: TransactionStatus,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        if transaction.status == target_status {
            return Ok(transaction);
        }

        self.state_machine.validate_automatic(transaction.status, target_status)?;

        let completion_at = target_status.is_terminal().then(crate::ids::now);
        let updated = self
            .transactions
            .update_status(id, transaction.version, target_status, None, None, completion_at, None)
            .await?;

        self.history
            .append(NewHistoryEntry::automatic_as(
                id,
                Some(transaction.status),
                target_status,
                reason.into(),
                actor.into(),
                updated.attempt_count,
            ))
            .await?;

        let event = match target_status {
            TransactionStatus::Completed => EventType::TransactionCompleted,
            TransactionStatus::Failed => EventType::TransactionFailed,
            TransactionStatus::Timeout => EventType::TransactionTimeout,
            TransactionStatus::Inconsistent => EventType::TransactionInconsistent,
            _ => EventType::TransactionStatusChanged,
        };
        self.emit(event, &updated, Some(transaction.status)).await;
        if target_status == TransactionStatus::Timeout {
            self.metrics.record_transaction_timed_out();
        }
        Ok(updated)
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Operator override: bypasses the automatic-transition check
    /// entirely, since operators may correct a row into any state.
    pub async fn manually_handle(
        &self,
        id: Uuid,
        target_status: TransactionStatus,
        notes: impl Into<String>,
        admin_user: impl Into<String>,
    ) -> AppResult<Transaction> {
        let transaction = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        let notes = notes.into();
        let completion_at = target_status.is_terminal().then(crate::ids::now);

        let updated = self
            .transactions
            .update_status(id, transaction.version, target_status, None, None, completion_at, Some(notes.clone()))
            .await?;

        self.history
            .append(NewHistoryEntry::manual(
                id,
                Some(transaction.status),
                target_status,
                notes,
                admin_user.into(),
                updated.attempt_count,
            ))
            .await?;
        self.emit(EventType::TransactionManualResolution, &updated, Some(transaction.status)).await;
        Ok(updated)
    }
}
