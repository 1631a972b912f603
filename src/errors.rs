use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy for registry operations.
///
/// Invalid input and not-found are rejected before any mutation, so
/// callers never have to reason about partial state changes. Storage
/// failures surface as `Storage` and are never retried here — retry
/// policy belongs to the caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("payment server not found")]
    ServerNotFound,

    #[error("amount must be a positive monetary value, got {0}")]
    InvalidAmount(Decimal),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match &self {
            AppError::ServerNotFound => (
                StatusCode::NOT_FOUND,
                "server_not_found",
                self.to_string(),
            ),
            AppError::InvalidAmount(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_amount",
                self.to_string(),
            ),
            AppError::MissingField(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing_field",
                self.to_string(),
            ),
            AppError::Storage(e) => {
                tracing::error!("storage error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
