use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::ServerStore;
use crate::models::server::{NewServer, PaymentServer, ServerUpdate};

/// In-process store backed by a single read-write lock.
///
/// The whole-table lock makes `select` and `add_usage` atomic, so the
/// at-most-one-selected invariant holds under concurrent callers. Used by
/// the test suite and for single-node development; production deployments
/// use [`super::postgres::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    table: RwLock<HashMap<i64, PaymentServer>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Preload the table with fully-formed records; the id counter
    /// advances past the highest seeded id. Fixture helper for tests that
    /// need exact usage/last_used states — production rows always come
    /// from `insert`.
    pub async fn seed(&self, servers: Vec<PaymentServer>) {
        let mut table = self.table.write().await;
        for server in servers {
            self.next_id.fetch_max(server.id + 1, Ordering::SeqCst);
            table.insert(server.id, server);
        }
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn insert(
        &self,
        server: &NewServer,
        is_selected: bool,
    ) -> anyhow::Result<PaymentServer> {
        let now = Utc::now();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = PaymentServer {
            id,
            name: server.name.clone(),
            url: server.url.clone(),
            api_key: server.api_key.clone(),
            api_secret: server.api_secret.clone(),
            capacity_limit: server.capacity_limit,
            current_usage: Decimal::ZERO,
            is_active: server.is_active,
            is_selected,
            priority: server.priority,
            last_used: None,
            product_id_pool: server.product_id_pool.clone(),
            created_at: now,
            updated_at: now,
        };
        self.table.write().await.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<PaymentServer>> {
        Ok(self.table.read().await.get(&id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<PaymentServer>> {
        let mut servers: Vec<_> = self.table.read().await.values().cloned().collect();
        servers.sort_by_key(|s| s.id);
        Ok(servers)
    }

    async fn update(
        &self,
        id: i64,
        changes: &ServerUpdate,
    ) -> anyhow::Result<Option<PaymentServer>> {
        let mut table = self.table.write().await;
        let Some(server) = table.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            server.name = name.clone();
        }
        if let Some(url) = &changes.url {
            server.url = url.clone();
        }
        if let Some(api_key) = &changes.api_key {
            server.api_key = api_key.clone();
        }
        if let Some(api_secret) = &changes.api_secret {
            server.api_secret = api_secret.clone();
        }
        if let Some(capacity) = changes.capacity_limit {
            server.capacity_limit = capacity;
        }
        if let Some(priority) = changes.priority {
            server.priority = priority;
        }
        if let Some(active) = changes.is_active {
            server.is_active = active;
        }
        if let Some(pool) = &changes.product_id_pool {
            server.product_id_pool = Some(pool.clone());
        }
        server.updated_at = Utc::now();
        Ok(Some(server.clone()))
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        Ok(self.table.write().await.remove(&id).is_some())
    }

    async fn select(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut table = self.table.write().await;
        if !table.contains_key(&id) {
            return Ok(false);
        }
        for server in table.values_mut() {
            server.is_selected = false;
        }
        if let Some(server) = table.get_mut(&id) {
            server.is_selected = true;
            server.last_used = Some(at);
            server.updated_at = at;
        }
        Ok(true)
    }

    async fn add_usage(
        &self,
        id: i64,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<PaymentServer>> {
        let mut table = self.table.write().await;
        match table.get_mut(&id) {
            Some(server) => {
                server.current_usage += amount;
                server.last_used = Some(at);
                server.updated_at = at;
                Ok(Some(server.clone()))
            }
            None => Ok(None),
        }
    }

    async fn reset_usage(&self, id: i64) -> anyhow::Result<bool> {
        let mut table = self.table.write().await;
        match table.get_mut(&id) {
            Some(server) => {
                server.current_usage = Decimal::ZERO;
                server.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
