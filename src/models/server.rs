use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A configured upstream payment proxy endpoint.
///
/// One record per proxy server the storefront may delegate capture to.
/// `current_usage` accumulates the monetary total processed through the
/// server since its last reset; once it reaches `capacity_limit` the
/// server is considered exhausted and selection moves elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PaymentServer {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Shared-secret identifier consumed by the outbound request-signing
    /// layer.
    pub api_key: String,
    /// Counterpart secret. Never serialized into API responses.
    #[serde(skip_serializing)]
    pub api_secret: String,
    pub capacity_limit: Decimal,
    pub current_usage: Decimal,
    pub is_active: bool,
    pub is_selected: bool,
    /// Lower sorts first when choosing among otherwise-equal candidates.
    pub priority: i32,
    /// Timestamp of the most recent selection. `None` = never selected.
    pub last_used: Option<DateTime<Utc>>,
    /// Comma-separated remote-side product ids for the downstream mapping
    /// feature. Opaque here apart from [`PaymentServer::product_ids`].
    pub product_id_pool: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentServer {
    /// True while the server still has headroom under its ceiling.
    pub fn has_capacity(&self) -> bool {
        self.current_usage < self.capacity_limit
    }

    /// Remaining headroom; negative once usage has overshot the ceiling.
    pub fn remaining_capacity(&self) -> Decimal {
        self.capacity_limit - self.current_usage
    }

    /// Remote product ids parsed out of the pool column.
    pub fn product_ids(&self) -> Vec<String> {
        self.product_id_pool
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Input for registering a proxy server.
#[derive(Debug, Clone, Deserialize)]
pub struct NewServer {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    pub capacity_limit: Decimal,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub product_id_pool: Option<String>,
}

fn default_priority() -> i32 {
    10
}

fn default_active() -> bool {
    true
}

/// Field-mask update for a server record. `None` leaves a field untouched.
///
/// The selected flag is deliberately absent: it moves only through
/// `ServerRegistry::set_selected_server` and the failover paths, which
/// keep the at-most-one-selected invariant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub capacity_limit: Option<Decimal>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    pub product_id_pool: Option<String>,
}

// ── Tests ─────────────────────────────────────────────────────
