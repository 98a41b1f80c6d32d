//! End-to-end transaction lifecycle behavior against a real database:
//! creation, idempotent replay, completion, and the history trail.

use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;

use txncore::models::{TransactionRequest, TransactionStatus};

mod common;

fn request(id: Uuid, origin_system: &str) -> TransactionRequest {
    let mut payload = HashMap::new();
    payload.insert("amount".to_string(), json!(4200));
    payload.insert("accountNumber".to_string(), json!("acct-1"));
    TransactionRequest { id, origin_system: origin_system.to_string(), payload, webhook_url: None, retry: false }
}

#[tokio::test]
async fn creating_a_transaction_twice_with_the_same_payload_is_idempotent() {
    let harness = common::build_harness().await;
    let origin_system = common::unique_origin_system("payments");
    let id = Uuid::new_v4();

    let first = harness.admin.create_transaction(request(id, &origin_system)).await.unwrap();
    assert_eq!(first.status, TransactionStatus::Pending);
    assert_eq!(first.attempt_count, 1);

    let second = harness.admin.create_transaction(request(id, &origin_system)).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt_count, first.attempt_count);

    let history = harness.admin.get_transaction_history(id).await.unwrap();
    assert_eq!(history.len(), 1, "a duplicate submission must not append a second history row");
}

#[tokio::test]
async fn a_conflicting_resubmission_is_rejected() {
    let harness = common::build_harness().await;
    let origin_system = common::unique_origin_system("payments");
    let id = Uuid::new_v4();

    harness.admin.create_transaction(request(id, &origin_system)).await.unwrap();

    let mut conflicting = request(id, &origin_system);
    conflicting.payload.insert("amount".to_string(), json!(999_999));

    let result = harness.admin.create_transaction(conflicting).await;
    assert!(result.is_err(), "a critical-field mismatch on the same id must be rejected, not silently accepted");
}

#[tokio::test]
async fn completing_a_transaction_sets_terminal_fields_and_is_reflected_in_history() {
    let harness = common::build_harness().await;
    let origin_system = common::unique_origin_system("payments");
    let id = Uuid::new_v4();

    harness.admin.create_transaction(request(id, &origin_system)).await.unwrap();

    let completed = harness
        .admin
        .update_transaction_status(id, TransactionStatus::Processing, "picked up by worker", "worker-1")
        .await
        .unwrap();
    assert_eq!(completed.status, TransactionStatus::Processing);

    let resolved = harness.admin.resolve_transaction(id, TransactionStatus::Completed, "settled upstream", "ops-1").await.unwrap();
    assert_eq!(resolved.status, TransactionStatus::Completed);
    assert!(resolved.completion_at.is_some());

    let history = harness.admin.get_transaction_history(id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.last().unwrap().new_status, TransactionStatus::Completed);
}

#[tokio::test]
async fn looking_up_an_unknown_transaction_fails() {
    let harness = common::build_harness().await;
    let result = harness.admin.get_transaction(Uuid::new_v4()).await;
    assert!(result.is_err());
}
