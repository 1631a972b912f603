pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::server::{NewServer, PaymentServer, ServerUpdate};

/// Abstraction over the persistent record store backing the registry.
///
/// Implementations: [`memory::MemoryStore`] (tests, single-process dev)
/// and [`postgres::PgStore`] (production). Every method is a short read or
/// write; all coordination between concurrent requests happens here.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Insert a record, returning it with its store-assigned id.
    async fn insert(
        &self,
        server: &NewServer,
        is_selected: bool,
    ) -> anyhow::Result<PaymentServer>;

    async fn get(&self, id: i64) -> anyhow::Result<Option<PaymentServer>>;

    /// Every record, ordered by id ascending.
    async fn list(&self) -> anyhow::Result<Vec<PaymentServer>>;

    /// Apply a field-mask update. Returns the updated record, or `None`
    /// when the id does not exist.
    async fn update(
        &self,
        id: i64,
        changes: &ServerUpdate,
    ) -> anyhow::Result<Option<PaymentServer>>;

    /// Delete a record. Returns whether a row was removed.
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;

    /// Clear every selected flag, then set it on `id` and stamp that
    /// row's `last_used`. Atomic per store, which is what maintains the
    /// at-most-one-selected invariant. Unknown ids change nothing and
    /// return false.
    async fn select(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Atomically add `amount` to `current_usage` and stamp `last_used`.
    /// Returns the updated record, or `None` for an unknown id.
    async fn add_usage(
        &self,
        id: i64,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<PaymentServer>>;

    /// Set `current_usage` back to zero. Activity and selection flags are
    /// left untouched. Returns whether the row existed.
    async fn reset_usage(&self, id: i64) -> anyhow::Result<bool>;
}
