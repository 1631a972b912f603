use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the admin API router. All routes are relative — the caller
/// mounts this under `/api/v1`. Every route sits behind the admin-key
/// middleware; the handlers themselves are thin serialization wrappers
/// over the registry.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/servers",
            get(handlers::list_servers).post(handlers::create_server),
        )
        .route("/servers/selected", get(handlers::get_selected))
        .route("/servers/next", post(handlers::next_server))
        .route(
            "/servers/:id",
            get(handlers::get_server)
                .put(handlers::update_server)
                .delete(handlers::delete_server),
        )
        .route("/servers/:id/select", post(handlers::select_server))
        .route("/servers/:id/usage", post(handlers::report_usage))
        .route("/servers/:id/reset-usage", post(handlers::reset_usage))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
        .with_state(state)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a Bearer token) against the
/// configured admin key. Returns 401 if missing/invalid, 500 when no key
/// is configured at all.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
        });

    let Some(expected) = state.config.admin_key.as_deref() else {
        tracing::error!("PAYRELAY_ADMIN_KEY is not configured; refusing admin request");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    match provided_key {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(_) => {
            // Never log the provided or expected key material.
            tracing::warn!("admin API: invalid key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
