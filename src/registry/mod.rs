//! Server registry and selection core.
//!
//! Decides which upstream payment proxy handles the next checkout, tracks
//! per-server monetary usage against capacity ceilings, and moves the
//! selected-server pointer when a ceiling is reached. All state lives in
//! the record store; any number of request handlers can hold a clone.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::server::{NewServer, PaymentServer, ServerUpdate};
use crate::store::ServerStore;

/// CRUD over proxy-server records plus the selection/failover algorithm.
///
/// Constructed explicitly with a store and injected wherever checkout or
/// payment-completion code needs it — no global singleton.
#[derive(Clone)]
pub struct ServerRegistry {
    store: Arc<dyn ServerStore>,
}

impl ServerRegistry {
    pub fn new(store: Arc<dyn ServerStore>) -> Self {
        Self { store }
    }

    // ── Reads ────────────────────────────────────────────────

    /// The server currently holding the selected pointer, if any.
    ///
    /// Pure read: the returned server may already be over capacity.
    /// Payment paths must go through [`Self::get_next_available_server`]
    /// for capacity-safe behavior.
    pub async fn get_selected_server(&self) -> Result<Option<PaymentServer>, AppError> {
        let servers = self.store.list().await?;
        Ok(servers.into_iter().find(|s| s.is_selected))
    }

    pub async fn get_server(&self, id: i64) -> Result<Option<PaymentServer>, AppError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn get_all_servers(&self) -> Result<Vec<PaymentServer>, AppError> {
        Ok(self.store.list().await?)
    }

    // ── Selection ────────────────────────────────────────────

    /// Pick the server the next checkout should contact.
    ///
    /// Sticky while the selected server has headroom; otherwise the best
    /// active under-capacity candidate, then the least-loaded active
    /// server, then any record at all. The pointer is persisted whenever
    /// the choice changes, so [`Self::get_selected_server`] reflects
    /// automatic failovers without re-running selection. Returns `None`
    /// only for an empty registry.
    pub async fn get_next_available_server(
        &self,
    ) -> Result<Option<PaymentServer>, AppError> {
        let servers = self.store.list().await?;
        let previous = servers.iter().find(|s| s.is_selected);

        // Sticky: keep the current selection while it has headroom, even
        // if an administrator has deactivated it in the meantime.
        if let Some(current) = previous {
            if current.has_capacity() {
                return Ok(Some(current.clone()));
            }
        }

        let choice = pick_available(&servers)
            .or_else(|| pick_least_loaded(&servers))
            .or_else(|| pick_any_ignoring_active(&servers));

        let Some(choice) = choice else {
            warn!("no payment servers configured, nothing to select");
            return Ok(None);
        };

        if previous.map(|s| s.id) == Some(choice.id) {
            return Ok(Some(choice.clone()));
        }

        info!(
            server_id = choice.id,
            server = %choice.name,
            previous = previous.map(|s| s.id),
            usage = %choice.current_usage,
            capacity = %choice.capacity_limit,
            "moving selected server"
        );
        self.store.select(choice.id, Utc::now()).await?;
        match self.store.get(choice.id).await? {
            Some(updated) => Ok(Some(updated)),
            // Deleted out from under us; the caller still gets a target.
            None => Ok(Some(choice.clone())),
        }
    }

    /// Pin the selected pointer to a specific server.
    ///
    /// No capacity or activity check — the next
    /// [`Self::get_next_available_server`] call routes around an exhausted
    /// pin on its own.
    pub async fn set_selected_server(&self, id: i64) -> Result<(), AppError> {
        if self.store.get(id).await?.is_none() {
            return Err(AppError::ServerNotFound);
        }
        self.store.select(id, Utc::now()).await?;
        info!(server_id = id, "selected server pinned");
        Ok(())
    }

    // ── Usage accounting ─────────────────────────────────────

    /// Record a captured payment's total against a server.
    ///
    /// Not idempotent: the order-completion workflow reports each captured
    /// payment exactly once. Non-positive amounts and unknown ids are
    /// rejected before any mutation. Crossing the capacity ceiling on the
    /// selected server deactivates it and proactively fails the pointer
    /// over — unless no alternative exists, in which case the server is
    /// re-activated so checkout keeps working.
    pub async fn add_server_usage(
        &self,
        id: i64,
        amount: Decimal,
    ) -> Result<PaymentServer, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount(amount));
        }
        let before = self
            .store
            .get(id)
            .await?
            .ok_or(AppError::ServerNotFound)?;
        // The threshold decision below works from this pre-write read.
        // Concurrent reports can each see pre-update usage, so enforcement
        // is eventual: usage may overshoot by the in-flight sum before the
        // server is taken out of rotation.
        let new_usage = before.current_usage + amount;

        let updated = self
            .store
            .add_usage(id, amount, Utc::now())
            .await?
            .ok_or(AppError::ServerNotFound)?;

        debug!(
            server_id = id,
            amount = %amount,
            usage = %updated.current_usage,
            "usage recorded"
        );

        if before.is_selected && new_usage >= before.capacity_limit {
            self.fail_over_from(&before, new_usage).await?;
            if let Some(current) = self.store.get(id).await? {
                return Ok(current);
            }
        }
        Ok(updated)
    }

    /// The selected server crossed its ceiling: take it out of the active
    /// pool and move the pointer, or keep it running when it is the only
    /// server left.
    async fn fail_over_from(
        &self,
        exhausted: &PaymentServer,
        new_usage: Decimal,
    ) -> Result<(), AppError> {
        warn!(
            server_id = exhausted.id,
            server = %exhausted.name,
            usage = %new_usage,
            capacity = %exhausted.capacity_limit,
            "selected server reached its capacity ceiling"
        );
        let deactivate = ServerUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        self.store.update(exhausted.id, &deactivate).await?;

        let servers = self.store.list().await?;
        match pick_failover(&servers, exhausted.id) {
            Some(next) => {
                info!(
                    from = exhausted.id,
                    to = next.id,
                    server = %next.name,
                    "failing over selected server"
                );
                self.store.select(next.id, Utc::now()).await?;
            }
            None => {
                // Over-capacity service beats refusing checkouts outright.
                warn!(
                    server_id = exhausted.id,
                    "no alternative server; re-activating the exhausted one"
                );
                let reactivate = ServerUpdate {
                    is_active: Some(true),
                    ..Default::default()
                };
                self.store.update(exhausted.id, &reactivate).await?;
            }
        }
        Ok(())
    }

    // ── CRUD ─────────────────────────────────────────────────

    pub async fn add_server(&self, new: NewServer) -> Result<PaymentServer, AppError> {
        if new.name.trim().is_empty() {
            return Err(AppError::MissingField("name"));
        }
        if new.url.trim().is_empty() {
            return Err(AppError::MissingField("url"));
        }
        if new.capacity_limit < Decimal::ZERO {
            return Err(AppError::InvalidAmount(new.capacity_limit));
        }
        // The very first server becomes the selection automatically.
        let first = self.store.list().await?.is_empty();
        let created = self.store.insert(&new, first).await?;
        info!(
            server_id = created.id,
            server = %created.name,
            selected = first,
            "payment server added"
        );
        Ok(created)
    }

    pub async fn update_server(
        &self,
        id: i64,
        changes: ServerUpdate,
    ) -> Result<PaymentServer, AppError> {
        if let Some(capacity) = changes.capacity_limit {
            if capacity < Decimal::ZERO {
                return Err(AppError::InvalidAmount(capacity));
            }
        }
        let updated = self
            .store
            .update(id, &changes)
            .await?
            .ok_or(AppError::ServerNotFound)?;
        info!(server_id = id, "payment server updated");
        Ok(updated)
    }

    /// Delete a server. Deleting the one holding the selected pointer
    /// triggers reselection: active servers by (priority, id), else any
    /// remaining server by id; an emptied registry keeps no pointer.
    pub async fn delete_server(&self, id: i64) -> Result<(), AppError> {
        let server = self
            .store
            .get(id)
            .await?
            .ok_or(AppError::ServerNotFound)?;
        if !self.store.delete(id).await? {
            return Err(AppError::ServerNotFound);
        }
        info!(server_id = id, server = %server.name, "payment server deleted");

        if server.is_selected {
            let remaining = self.store.list().await?;
            if let Some(next) = pick_post_delete(&remaining) {
                info!(
                    from = id,
                    to = next.id,
                    "reselecting after deletion of the selected server"
                );
                self.store.select(next.id, Utc::now()).await?;
            }
        }
        Ok(())
    }

    /// Zero a server's usage counter. Does not touch the activity flag —
    /// re-activating an administrator-deactivated server is a separate,
    /// explicit action.
    pub async fn reset_usage(&self, id: i64) -> Result<(), AppError> {
        if !self.store.reset_usage(id).await? {
            return Err(AppError::ServerNotFound);
        }
        info!(server_id = id, "usage counter reset to zero");
        Ok(())
    }
}

// ── Candidate ordering ───────────────────────────────────────

/// Best active under-capacity candidate, in rotation order.
fn pick_available(servers: &[PaymentServer]) -> Option<&PaymentServer> {
    servers
        .iter()
        .filter(|s| s.is_active && s.has_capacity())
        .min_by(|a, b| rotation_order(a, b))
}

/// Priority ascending, then least recently used (`None` = never used
/// sorts first), then id. Spreads load across same-priority servers.
fn rotation_order(a: &PaymentServer, b: &PaymentServer) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.last_used.cmp(&b.last_used))
        .then_with(|| a.id.cmp(&b.id))
}

/// Every active server is at or over capacity: degrade to the one with
/// the lowest usage-to-capacity ratio instead of failing the checkout.
fn pick_least_loaded(servers: &[PaymentServer]) -> Option<&PaymentServer> {
    servers
        .iter()
        .filter(|s| s.is_active)
        .min_by(|a, b| ratio_order(a, b))
}

/// `usage_a/cap_a` vs `usage_b/cap_b`, cross-multiplied so a zero
/// capacity cannot divide by zero; ties break by priority, then id.
fn ratio_order(a: &PaymentServer, b: &PaymentServer) -> Ordering {
    (a.current_usage * b.capacity_limit)
        .cmp(&(b.current_usage * a.capacity_limit))
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| a.id.cmp(&b.id))
}

/// Last resort when no server is active at all: any record, by priority
/// then id. Deliberately ignores `is_active` — attempting a payment beats
/// refusing service on a misconfigured registry.
fn pick_any_ignoring_active(servers: &[PaymentServer]) -> Option<&PaymentServer> {
    servers
        .iter()
        .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)))
}

/// Replacement when the selected server exhausts: active servers other
/// than the exhausted one, in rotation order.
fn pick_failover(servers: &[PaymentServer], exclude: i64) -> Option<&PaymentServer> {
    servers
        .iter()
        .filter(|s| s.is_active && s.id != exclude)
        .min_by(|a, b| rotation_order(a, b))
}

/// Replacement after deleting the selected server: active by (priority,
/// id), else anything by id.
fn pick_post_delete(servers: &[PaymentServer]) -> Option<&PaymentServer> {
    servers
        .iter()
        .filter(|s| s.is_active)
        .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)))
        .or_else(|| servers.iter().min_by_key(|s| s.id))
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn server(id: i64, priority: i32, capacity: &str, usage: &str) -> PaymentServer {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        PaymentServer {
            id,
            name: format!("proxy-{id}"),
            url: format!("https://proxy{id}.example.com"),
            api_key: String::new(),
            api_secret: String::new(),
            capacity_limit: capacity.parse().unwrap(),
            current_usage: usage.parse().unwrap(),
            is_active: true,
            is_selected: false,
            priority,
            last_used: None,
            product_id_pool: None,
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn rotation_prefers_priority_over_recency() {
        let mut a = server(1, 20, "100.00", "0");
        a.last_used = None; // never used, but low priority tier
        let b = server(2, 10, "100.00", "0");
        assert_eq!(pick_available(&[a, b.clone()]).unwrap().id, b.id);
    }

    #[test]
    fn rotation_prefers_never_used_within_a_tier() {
        let mut a = server(1, 10, "100.00", "0");
        a.last_used = Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        let b = server(2, 10, "100.00", "0");
        assert_eq!(pick_available(&[a, b]).unwrap().id, 2);
    }

    #[test]
    fn rotation_flips_once_last_used_moves_forward() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap();
        let mut a = server(1, 10, "100.00", "0");
        let mut b = server(2, 10, "100.00", "0");
        a.last_used = Some(t1);
        b.last_used = Some(t2);
        assert_eq!(pick_available(&[a.clone(), b.clone()]).unwrap().id, 1);

        // After a gets picked its timestamp advances, so b comes next.
        a.last_used = Some(Utc.with_ymd_and_hms(2026, 1, 4, 0, 0, 0).unwrap());
        assert_eq!(pick_available(&[a, b]).unwrap().id, 2);
    }

    #[test]
    fn available_skips_exhausted_and_inactive() {
        let exhausted = server(1, 10, "100.00", "100.00");
        let mut inactive = server(2, 10, "100.00", "0");
        inactive.is_active = false;
        let ok = server(3, 10, "100.00", "50.00");
        assert_eq!(
            pick_available(&[exhausted, inactive, ok]).unwrap().id,
            3
        );
    }

    #[test]
    fn ratio_picks_least_overshot() {
        let a = server(1, 10, "100.00", "110.00"); // 110%
        let b = server(2, 10, "100.00", "105.00"); // 105%
        assert_eq!(pick_least_loaded(&[a, b]).unwrap().id, 2);
    }

    #[test]
    fn ratio_handles_zero_capacity_without_panicking() {
        let zero_cap = server(1, 10, "0.00", "10.00");
        let normal = server(2, 10, "100.00", "150.00");
        // 10/0 is "worse" than 150/100 under cross-multiplication
        assert_eq!(pick_least_loaded(&[zero_cap, normal]).unwrap().id, 2);
    }

    #[test]
    fn ratio_tie_breaks_by_priority_then_id() {
        let a = server(1, 20, "100.00", "105.00");
        let b = server(2, 10, "200.00", "210.00"); // same ratio, higher priority
        assert_eq!(pick_least_loaded(&[a, b]).unwrap().id, 2);

        let c = server(3, 10, "100.00", "105.00");
        let d = server(4, 10, "200.00", "210.00");
        assert_eq!(pick_least_loaded(&[c, d]).unwrap().id, 3);
    }

    #[test]
    fn last_resort_ignores_active_flag() {
        let mut a = server(1, 20, "100.00", "0");
        let mut b = server(2, 10, "100.00", "0");
        a.is_active = false;
        b.is_active = false;
        assert_eq!(pick_any_ignoring_active(&[a, b]).unwrap().id, 2);
    }

    #[test]
    fn failover_excludes_the_exhausted_server() {
        let a = server(1, 10, "100.00", "100.00");
        let b = server(2, 20, "100.00", "0");
        assert_eq!(pick_failover(&[a, b], 1).unwrap().id, 2);
        assert!(pick_failover(&[server(1, 10, "100.00", "100.00")], 1).is_none());
    }

    #[test]
    fn post_delete_prefers_active_then_any_by_id() {
        let mut a = server(1, 10, "100.00", "0");
        a.is_active = false;
        let b = server(2, 20, "100.00", "0");
        assert_eq!(pick_post_delete(&[a.clone(), b]).unwrap().id, 2);

        let mut c = server(3, 5, "100.00", "0");
        c.is_active = false;
        assert_eq!(pick_post_delete(&[c, a]).unwrap().id, 1);
    }
}
