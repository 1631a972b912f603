//! Capacity warning sweep.
//!
//! Periodically compares every server's usage against its ceiling, logs
//! servers past the warning threshold and dispatches webhook events for
//! them. Observability only: the watcher never moves the selected pointer
//! or touches activity flags — that happens inline in the registry when
//! usage is recorded. Events re-fire on every sweep while the condition
//! holds.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::notification::webhook::WebhookEvent;
use crate::AppState;

/// Spawn the periodic watcher; the interval comes from
/// `PAYRELAY_WATCH_INTERVAL_SECS`.
pub fn spawn(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.watch_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = run_capacity_check(&state).await {
                tracing::error!("capacity check failed: {e:#}");
            }
        }
    });
}

/// Run one sweep. Separated from [`spawn`] so tests can drive it
/// directly.
pub async fn run_capacity_check(state: &Arc<AppState>) -> anyhow::Result<()> {
    debug!("capacity check: starting sweep");
    let servers = state.registry.get_all_servers().await?;
    let warn_pct = Decimal::from(state.config.capacity_warn_pct);
    let hundred = Decimal::from(100);

    for server in &servers {
        if server.capacity_limit <= Decimal::ZERO {
            continue;
        }
        // usage * 100 >= capacity * warn_pct  <=>  usage/capacity >= warn_pct%
        if server.current_usage * hundred < server.capacity_limit * warn_pct {
            continue;
        }

        let event = if server.has_capacity() {
            warn!(
                server_id = server.id,
                server = %server.name,
                usage = %server.current_usage,
                capacity = %server.capacity_limit,
                "server nearing its capacity ceiling"
            );
            WebhookEvent::capacity_warning(
                server.id,
                &server.name,
                server.current_usage,
                server.capacity_limit,
            )
        } else {
            warn!(
                server_id = server.id,
                server = %server.name,
                usage = %server.current_usage,
                capacity = %server.capacity_limit,
                "server at or over its capacity ceiling"
            );
            WebhookEvent::server_exhausted(
                server.id,
                &server.name,
                server.current_usage,
                server.capacity_limit,
            )
        };

        if !state.config.webhook_urls.is_empty() {
            state
                .webhook
                .dispatch(
                    &state.config.webhook_urls,
                    state.config.webhook_secret.as_deref(),
                    event,
                )
                .await;
        }
    }

    debug!("capacity check: complete");
    Ok(())
}
