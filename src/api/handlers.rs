use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::server::{NewServer, PaymentServer, ServerUpdate};
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

/// Body for POST /servers/:id/usage, sent by the order-completion
/// workflow after a successful capture. Not idempotent: exactly one
/// report per captured payment.
#[derive(Deserialize)]
pub struct ReportUsageRequest {
    pub amount: Decimal,
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /servers — every configured proxy server.
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PaymentServer>>, AppError> {
    Ok(Json(state.registry.get_all_servers().await?))
}

/// POST /servers — register a proxy server.
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewServer>,
) -> Result<(StatusCode, Json<PaymentServer>), AppError> {
    let created = state.registry.add_server(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /servers/selected — the current pointer; 404 when none exists.
pub async fn get_selected(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PaymentServer>, AppError> {
    state
        .registry
        .get_selected_server()
        .await?
        .map(Json)
        .ok_or(AppError::ServerNotFound)
}

/// POST /servers/next — run selection; may move the pointer.
pub async fn next_server(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PaymentServer>, AppError> {
    state
        .registry
        .get_next_available_server()
        .await?
        .map(Json)
        .ok_or(AppError::ServerNotFound)
}

/// GET /servers/:id
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PaymentServer>, AppError> {
    state
        .registry
        .get_server(id)
        .await?
        .map(Json)
        .ok_or(AppError::ServerNotFound)
}

/// PUT /servers/:id — partial update; omitted fields stay unchanged.
pub async fn update_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(changes): Json<ServerUpdate>,
) -> Result<Json<PaymentServer>, AppError> {
    Ok(Json(state.registry.update_server(id, changes).await?))
}

/// DELETE /servers/:id
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.registry.delete_server(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /servers/:id/select — pin the selected pointer.
pub async fn select_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.registry.set_selected_server(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /servers/:id/usage — record a captured payment's total.
pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<ReportUsageRequest>,
) -> Result<Json<PaymentServer>, AppError> {
    Ok(Json(
        state.registry.add_server_usage(id, payload.amount).await?,
    ))
}

/// POST /servers/:id/reset-usage — zero the usage counter.
pub async fn reset_usage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.registry.reset_usage(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
