use std::time::Duration;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};

// ── Webhook Event Types ───────────────────────────────────────

/// Structured event payload sent to configured webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier, e.g. "capacity_warning".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub server_id: i64,
    pub server_name: String,
    /// Event-specific details (usage, limits).
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn capacity_warning(
        server_id: i64,
        server_name: &str,
        usage: Decimal,
        capacity: Decimal,
    ) -> Self {
        Self {
            event_type: "capacity_warning".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            server_id,
            server_name: server_name.to_string(),
            details: serde_json::json!({
                "current_usage": usage.to_string(),
                "capacity_limit": capacity.to_string(),
            }),
        }
    }

    pub fn server_exhausted(
        server_id: i64,
        server_name: &str,
        usage: Decimal,
        capacity: Decimal,
    ) -> Self {
        Self {
            event_type: "server_exhausted".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            server_id,
            server_name: server_name.to_string(),
            details: serde_json::json!({
                "current_usage": usage.to_string(),
                "capacity_limit": capacity.to_string(),
            }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload` keyed with `secret`, as "sha256=<hex>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Dispatches capacity events to one or more webhook URLs.
/// Signs payloads (X-Payrelay-Signature) when a secret is configured and
/// retries failed deliveries up to 3 times with increasing back-off.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Payrelay-Webhook/1.0")
                .build()
                .expect("failed to build webhook HTTP client"),
        }
    }

    /// Fire-and-forget delivery: failures are logged, never propagated.
    pub async fn dispatch(&self, urls: &[String], secret: Option<&str>, event: WebhookEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!("webhook: failed to serialize event: {e}");
                return;
            }
        };
        let signature = secret.map(|s| hmac_sha256_hex(s, &payload));

        for url in urls {
            self.deliver(url, &payload, signature.as_deref(), &event.event_type)
                .await;
        }
    }

    async fn deliver(
        &self,
        url: &str,
        payload: &[u8],
        signature: Option<&str>,
        event_type: &str,
    ) {
        let mut delay = Duration::from_secs(1);
        for attempt in 1..=3u32 {
            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .body(payload.to_vec());
            if let Some(sig) = signature {
                req = req.header("x-payrelay-signature", sig);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url, event_type, attempt, "webhook delivered");
                    return;
                }
                Ok(resp) => {
                    warn!(
                        url,
                        event_type,
                        attempt,
                        status = %resp.status(),
                        "webhook endpoint returned an error"
                    );
                }
                Err(e) => {
                    warn!(url, event_type, attempt, "webhook delivery failed: {e}");
                }
            }
            if attempt < 3 {
                tokio::time::sleep(delay).await;
                delay *= 5;
            }
        }
        warn!(url, event_type, "webhook delivery gave up after 3 attempts");
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex() {
        let sig = hmac_sha256_hex("secret", b"payload");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert_eq!(sig, hmac_sha256_hex("secret", b"payload"));
        assert_ne!(sig, hmac_sha256_hex("other", b"payload"));
    }

    #[test]
    fn capacity_warning_event_fields() {
        let event = WebhookEvent::capacity_warning(
            7,
            "proxy-eu",
            "92.50".parse().unwrap(),
            "100.00".parse().unwrap(),
        );
        assert_eq!(event.event_type, "capacity_warning");
        assert_eq!(event.server_id, 7);
        assert_eq!(event.server_name, "proxy-eu");
        assert_eq!(event.details["current_usage"], "92.50");
        assert_eq!(event.details["capacity_limit"], "100.00");
        assert!(!event.timestamp.is_empty());
    }
}
