//! Inbound callback subscribers use to acknowledge a delivered webhook.

use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;

#[derive(Debug, Deserialize)]
struct AcknowledgeRequest {
    event_id: Uuid,
    status: String,
}

async fn acknowledge(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(request): Json<AcknowledgeRequest>,
) -> Response {
    match state.default_pool.run(state.admin.acknowledge_delivery(request.event_id, &request.status)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response_with_path(uri.path()),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/acknowledge", post(acknowledge))
}
