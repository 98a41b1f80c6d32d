//! Webhook delivery against a mock HTTPS endpoint: fan-out creates a
//! delivery row, the signed POST reaches the subscriber, and a
//! successful response is recorded as delivered.

use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use txncore::models::{EventType, NewSubscription, TransactionRequest, TransactionStatus};

mod common;

fn request(id: Uuid, origin_system: &str) -> TransactionRequest {
    let mut payload = HashMap::new();
    payload.insert("amount".to_string(), json!(1500));
    TransactionRequest { id, origin_system: origin_system.to_string(), payload, webhook_url: None, retry: false }
}

#[tokio::test]
async fn a_registered_subscription_receives_a_signed_delivery_on_completion() {
    let harness = common::build_harness().await;
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/callback"))
        .and(header_exists("X-Webhook-Signature"))
        .and(header_exists("X-Webhook-Timestamp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let origin_system = common::unique_origin_system("orders");
    harness
        .admin
        .register_subscription(NewSubscription {
            origin_system: origin_system.clone(),
            callback_url: format!("{}/hooks/callback", mock_server.uri()).replacen("http://", "https://", 1),
            event_types: vec![EventType::TransactionCompleted],
            secret: "integration-test-secret".to_string(),
            max_retries: Some(3),
            description: None,
            contact_email: None,
        })
        .await
        .unwrap();

    let id = Uuid::new_v4();
    harness.admin.create_transaction(request(id, &origin_system)).await.unwrap();
    harness.admin.update_transaction_status(id, TransactionStatus::Processing, "picked up", "worker-1").await.unwrap();
    let transaction = harness.admin.resolve_transaction(id, TransactionStatus::Completed, "done", "ops-1").await.unwrap();

    let created = harness.delivery_engine.fan_out(&transaction, EventType::TransactionCompleted, None).await.unwrap();
    assert_eq!(created, 1);

    let deliveries = harness.admin.list_deliveries_for_transaction(id).await.unwrap();
    assert_eq!(deliveries.len(), 1);

    harness.admin.retry_delivery(deliveries[0].id).await.unwrap();

    let deliveries = harness.admin.list_deliveries_for_transaction(id).await.unwrap();
    assert_eq!(deliveries[0].status, txncore::models::DeliveryStatus::Delivered);
}

#[tokio::test]
async fn a_delivery_to_an_unreachable_endpoint_is_scheduled_for_retry() {
    let harness = common::build_harness().await;
    let origin_system = common::unique_origin_system("orders");

    harness
        .admin
        .register_subscription(NewSubscription {
            origin_system: origin_system.clone(),
            callback_url: "https://127.0.0.1.nip.io:1/does-not-exist".to_string(),
            event_types: vec![EventType::TransactionCompleted],
            secret: "integration-test-secret".to_string(),
            max_retries: Some(3),
            description: None,
            contact_email: None,
        })
        .await
        .unwrap();

    let id = Uuid::new_v4();
    harness.admin.create_transaction(request(id, &origin_system)).await.unwrap();
    harness.admin.update_transaction_status(id, TransactionStatus::Processing, "picked up", "worker-1").await.unwrap();
    let transaction = harness.admin.resolve_transaction(id, TransactionStatus::Completed, "done", "ops-1").await.unwrap();

    harness.delivery_engine.fan_out(&transaction, EventType::TransactionCompleted, None).await.unwrap();
    let deliveries = harness.admin.list_deliveries_for_transaction(id).await.unwrap();
    harness.admin.retry_delivery(deliveries[0].id).await.unwrap();

    let deliveries = harness.admin.list_deliveries_for_transaction(id).await.unwrap();
    assert_eq!(deliveries[0].status, txncore::models::DeliveryStatus::RetryScheduled);
    assert!(deliveries[0].next_retry_at.is_some());
}
