//! Crate-wide error type. Repositories, services, and schedulers all
//! return `Result<T, AppError>`; the few HTTP endpoints the binary
//! exposes convert it to a JSON body via `IntoResponse`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("illegal transition: {0}")]
    IllegalTransition(#[from] crate::domain::StateMachineError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request body: {0}")]
    Json(#[from] JsonRejection),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::IllegalTransition(_) => "ILLEGAL_TRANSITION",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Http(_) => "UPSTREAM_HTTP_ERROR",
            AppError::Json(_) => "INVALID_BODY",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Other(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) | AppError::IllegalTransition(_) | AppError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Database(_) | AppError::Http(_) | AppError::Internal(_) | AppError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl AppError {
    /// Builds the `{timestamp, status, error, message, path, details?}`
    /// response body, with the originating request path attached. Prefer
    /// this over the blanket `IntoResponse` impl wherever a handler has
    /// the path available.
    pub fn into_response_with_path(self, path: &str) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, path, "request failed");
        } else {
            tracing::warn!(error = %self, path, "request rejected");
        }

        let body = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "status": self.status().as_u16(),
            "error": self.code(),
            "message": self.to_string(),
            "path": path,
            "details": JsonValue::Null,
        });

        (self.status(), Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        let body = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "status": self.status().as_u16(),
            "error": self.code(),
            "message": self.to_string(),
            "path": JsonValue::Null,
            "details": JsonValue::Null,
        });

        (self.status(), Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
