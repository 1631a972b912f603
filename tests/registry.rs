//! Integration tests for the server registry core.
//!
//! These tests verify, over the in-memory store:
//! 1. Sticky selection while the selected server has capacity
//! 2. Failover when a usage report crosses the capacity ceiling
//! 3. Ratio fallback and the last-resort inactive fallback
//! 4. Rotation tie-breaks by priority / last_used / id
//! 5. CRUD edge behaviors (auto-select, deletion reselection, reset)
//! 6. Input rejection and exact decimal accounting

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use payrelay::errors::AppError;
use payrelay::models::server::{NewServer, PaymentServer, ServerUpdate};
use payrelay::registry::ServerRegistry;
use payrelay::store::memory::MemoryStore;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn server(id: i64, capacity: &str, usage: &str) -> PaymentServer {
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    PaymentServer {
        id,
        name: format!("proxy-{id}"),
        url: format!("https://proxy{id}.example.com"),
        api_key: format!("key-{id}"),
        api_secret: format!("secret-{id}"),
        capacity_limit: dec(capacity),
        current_usage: dec(usage),
        is_active: true,
        is_selected: false,
        priority: 10,
        last_used: None,
        product_id_pool: None,
        created_at: t,
        updated_at: t,
    }
}

fn new_server(name: &str, capacity: &str) -> NewServer {
    NewServer {
        name: name.into(),
        url: format!("https://{name}.example.com"),
        api_key: String::new(),
        api_secret: String::new(),
        capacity_limit: dec(capacity),
        priority: 10,
        is_active: true,
        product_id_pool: None,
    }
}

async fn registry_with(servers: Vec<PaymentServer>) -> ServerRegistry {
    let store = Arc::new(MemoryStore::new());
    store.seed(servers).await;
    ServerRegistry::new(store)
}

async fn assert_one_selected(registry: &ServerRegistry, expected_id: i64) {
    let servers = registry.get_all_servers().await.unwrap();
    let selected: Vec<_> = servers.iter().filter(|s| s.is_selected).collect();
    assert_eq!(selected.len(), 1, "exactly one server must be selected");
    assert_eq!(selected[0].id, expected_id);
}

// ── CRUD edge behaviors ───────────────────────────────────────

#[tokio::test]
async fn first_server_added_is_auto_selected() {
    let registry = registry_with(vec![]).await;

    let first = registry.add_server(new_server("alpha", "100.00")).await.unwrap();
    assert!(first.is_selected);

    let second = registry.add_server(new_server("beta", "100.00")).await.unwrap();
    assert!(!second.is_selected);

    assert_one_selected(&registry, first.id).await;
}

#[tokio::test]
async fn add_server_validates_required_fields() {
    let registry = registry_with(vec![]).await;

    let mut missing_name = new_server("x", "100.00");
    missing_name.name = "  ".into();
    assert!(matches!(
        registry.add_server(missing_name).await,
        Err(AppError::MissingField("name"))
    ));

    let mut missing_url = new_server("x", "100.00");
    missing_url.url = String::new();
    assert!(matches!(
        registry.add_server(missing_url).await,
        Err(AppError::MissingField("url"))
    ));

    let mut negative_cap = new_server("x", "100.00");
    negative_cap.capacity_limit = dec("-1.00");
    assert!(matches!(
        registry.add_server(negative_cap).await,
        Err(AppError::InvalidAmount(_))
    ));

    assert!(registry.get_all_servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_selected_server_reselects_active_by_priority_then_id() {
    let mut s = server(1, "100.00", "50.00");
    s.is_selected = true;
    let mut b = server(2, "100.00", "0");
    b.priority = 5;
    let mut c = server(3, "100.00", "0");
    c.priority = 5;
    let registry = registry_with(vec![s, b, c]).await;

    registry.delete_server(1).await.unwrap();

    // Equal priority 5 → lower id wins.
    assert_one_selected(&registry, 2).await;
}

#[tokio::test]
async fn deleting_selected_server_falls_back_to_any_by_id() {
    let mut s = server(1, "100.00", "0");
    s.is_selected = true;
    let mut d = server(2, "100.00", "0");
    d.is_active = false;
    let mut e = server(3, "100.00", "0");
    e.is_active = false;
    e.priority = 1; // priority is ignored in the any-by-id fallback
    let registry = registry_with(vec![s, d, e]).await;

    registry.delete_server(1).await.unwrap();

    assert_one_selected(&registry, 2).await;
}

#[tokio::test]
async fn deleting_last_server_leaves_no_selection() {
    let mut s = server(1, "100.00", "0");
    s.is_selected = true;
    let registry = registry_with(vec![s]).await;

    registry.delete_server(1).await.unwrap();

    assert!(registry.get_selected_server().await.unwrap().is_none());
    assert!(registry.get_all_servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_unselected_server_keeps_the_pointer() {
    let mut s = server(1, "100.00", "0");
    s.is_selected = true;
    let registry = registry_with(vec![s, server(2, "100.00", "0")]).await;

    registry.delete_server(2).await.unwrap();

    assert_one_selected(&registry, 1).await;
}

#[tokio::test]
async fn unknown_ids_are_rejected_without_side_effects() {
    let registry = registry_with(vec![server(1, "100.00", "0")]).await;

    assert!(matches!(
        registry.update_server(99, ServerUpdate::default()).await,
        Err(AppError::ServerNotFound)
    ));
    assert!(matches!(
        registry.delete_server(99).await,
        Err(AppError::ServerNotFound)
    ));
    assert!(matches!(
        registry.reset_usage(99).await,
        Err(AppError::ServerNotFound)
    ));
    assert!(matches!(
        registry.set_selected_server(99).await,
        Err(AppError::ServerNotFound)
    ));

    assert_eq!(registry.get_all_servers().await.unwrap().len(), 1);
}

// ── Selection ─────────────────────────────────────────────────

#[tokio::test]
async fn selection_is_sticky_while_capacity_remains() {
    let mut s = server(1, "100.00", "60.00");
    s.is_selected = true;
    let registry = registry_with(vec![s, server(2, "100.00", "0")]).await;

    for _ in 0..3 {
        let picked = registry.get_next_available_server().await.unwrap().unwrap();
        assert_eq!(picked.id, 1);
    }

    // Sticky hits are pure reads: no selection stamp was written.
    let s = registry.get_server(1).await.unwrap().unwrap();
    assert!(s.last_used.is_none());
    assert_one_selected(&registry, 1).await;
}

#[tokio::test]
async fn sticky_selection_survives_manual_deactivation() {
    // An inactive server is never a *new* selection, but an already
    // selected one keeps serving while under capacity.
    let mut s = server(1, "100.00", "10.00");
    s.is_selected = true;
    s.is_active = false;
    let registry = registry_with(vec![s, server(2, "100.00", "0")]).await;

    let picked = registry.get_next_available_server().await.unwrap().unwrap();
    assert_eq!(picked.id, 1);
}

#[tokio::test]
async fn selection_moves_off_an_exhausted_server() {
    let mut s = server(1, "100.00", "100.00");
    s.is_selected = true;
    let registry = registry_with(vec![s, server(2, "100.00", "20.00")]).await;

    let picked = registry.get_next_available_server().await.unwrap().unwrap();
    assert_eq!(picked.id, 2);
    assert!(picked.is_selected);
    assert!(picked.last_used.is_some());
    assert_one_selected(&registry, 2).await;
}

#[tokio::test]
async fn rotation_prefers_the_least_recently_used_peer() {
    // Selected server is exhausted and disabled; two equal-priority
    // alternatives differ only in last_used.
    let mut c = server(3, "100.00", "100.00");
    c.is_selected = true;
    c.is_active = false;
    let mut a = server(1, "100.00", "0");
    a.last_used = Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
    let mut b = server(2, "100.00", "0");
    b.last_used = Some(Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap());
    let registry = registry_with(vec![a, b, c]).await;

    let picked = registry.get_next_available_server().await.unwrap().unwrap();
    assert_eq!(picked.id, 1, "older last_used wins within a tier");
    assert_one_selected(&registry, 1).await;

    // Selection advanced server 1's timestamp...
    let a = registry.get_server(1).await.unwrap().unwrap();
    assert!(a.last_used.unwrap() > Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap());

    // ...so once it exhausts, rotation continues with server 2.
    registry.add_server_usage(1, dec("100.00")).await.unwrap();
    assert_one_selected(&registry, 2).await;
}

#[tokio::test]
async fn ratio_fallback_prefers_the_least_overshot_server() {
    // No sticky selection; both active servers are over capacity.
    let a = server(1, "100.00", "110.00"); // 110%
    let b = server(2, "100.00", "105.00"); // 105%
    let registry = registry_with(vec![a, b]).await;

    let picked = registry.get_next_available_server().await.unwrap().unwrap();
    assert_eq!(picked.id, 2);
    assert_one_selected(&registry, 2).await;
}

#[tokio::test]
async fn last_resort_falls_back_to_inactive_servers() {
    let mut a = server(1, "100.00", "0");
    a.is_active = false;
    a.priority = 20;
    let mut b = server(2, "100.00", "0");
    b.is_active = false;
    b.priority = 5;
    let registry = registry_with(vec![a, b]).await;

    // Nothing is active, but the checkout still gets a target.
    let picked = registry.get_next_available_server().await.unwrap().unwrap();
    assert_eq!(picked.id, 2);
    assert_one_selected(&registry, 2).await;
}

#[tokio::test]
async fn empty_registry_selects_nothing() {
    let registry = registry_with(vec![]).await;
    assert!(registry.get_next_available_server().await.unwrap().is_none());
    assert!(registry.get_selected_server().await.unwrap().is_none());
}

#[tokio::test]
async fn admin_pin_is_unchecked_but_routed_around() {
    let exhausted = server(1, "100.00", "100.00");
    let healthy = server(2, "100.00", "0");
    let registry = registry_with(vec![exhausted, healthy]).await;

    // Pinning ignores capacity...
    registry.set_selected_server(1).await.unwrap();
    assert_eq!(
        registry.get_selected_server().await.unwrap().unwrap().id,
        1
    );

    // ...but the payment path routes around the exhausted pin.
    let picked = registry.get_next_available_server().await.unwrap().unwrap();
    assert_eq!(picked.id, 2);
    assert_one_selected(&registry, 2).await;
}

// ── Usage accounting ──────────────────────────────────────────

#[tokio::test]
async fn failover_when_usage_crosses_the_ceiling() {
    let mut s = server(1, "100.00", "90.00");
    s.is_selected = true;
    let t = server(2, "100.00", "0");
    let registry = registry_with(vec![s, t]).await;

    let after = registry.add_server_usage(1, dec("15.00")).await.unwrap();

    assert_eq!(after.current_usage, dec("105.00"));
    assert!(!after.is_active);
    assert!(!after.is_selected);
    assert_one_selected(&registry, 2).await;
}

#[tokio::test]
async fn exhausted_server_is_reactivated_when_it_is_the_only_one() {
    let mut s = server(1, "100.00", "90.00");
    s.is_selected = true;
    let registry = registry_with(vec![s]).await;

    let after = registry.add_server_usage(1, dec("15.00")).await.unwrap();

    assert_eq!(after.current_usage, dec("105.00"));
    assert!(after.is_active, "sole server must be re-activated");
    assert!(after.is_selected, "sole server must stay selected");
    assert_one_selected(&registry, 1).await;
}

#[tokio::test]
async fn crossing_capacity_on_an_unselected_server_changes_nothing_else() {
    let mut s = server(1, "100.00", "0");
    s.is_selected = true;
    let registry = registry_with(vec![s, server(2, "100.00", "95.00")]).await;

    let after = registry.add_server_usage(2, dec("10.00")).await.unwrap();

    assert_eq!(after.current_usage, dec("105.00"));
    assert!(after.is_active, "threshold handling applies to the selected server only");
    assert_one_selected(&registry, 1).await;
}

#[tokio::test]
async fn non_positive_amounts_are_rejected_without_mutation() {
    let registry = registry_with(vec![server(1, "100.00", "42.00")]).await;

    assert!(matches!(
        registry.add_server_usage(1, dec("-5.00")).await,
        Err(AppError::InvalidAmount(_))
    ));
    assert!(matches!(
        registry.add_server_usage(1, dec("0")).await,
        Err(AppError::InvalidAmount(_))
    ));
    assert!(matches!(
        registry.add_server_usage(99, dec("5.00")).await,
        Err(AppError::ServerNotFound)
    ));

    let s = registry.get_server(1).await.unwrap().unwrap();
    assert_eq!(s.current_usage, dec("42.00"));
    assert!(s.last_used.is_none());
}

#[tokio::test]
async fn usage_accumulates_with_exact_decimal_precision() {
    let registry = registry_with(vec![server(1, "100.00", "0.00")]).await;

    let after = registry.add_server_usage(1, dec("19.99")).await.unwrap();
    assert_eq!(after.current_usage, dec("19.99"));
    assert_eq!(after.current_usage.to_string(), "19.99");

    // Re-read through the store: no rounding drift on the round-trip.
    let reread = registry.get_server(1).await.unwrap().unwrap();
    assert_eq!(reread.current_usage, dec("19.99"));

    registry.add_server_usage(1, dec("0.01")).await.unwrap();
    let reread = registry.get_server(1).await.unwrap().unwrap();
    assert_eq!(reread.current_usage, dec("20.00"));
}

#[tokio::test]
async fn usage_only_grows_until_an_explicit_reset() {
    let mut s = server(1, "1000.00", "0");
    s.is_active = false; // admin-disabled; reset must not re-enable it
    let registry = registry_with(vec![s]).await;

    let mut previous = dec("0");
    for amount in ["10.00", "0.50", "199.99"] {
        let after = registry.add_server_usage(1, dec(amount)).await.unwrap();
        assert!(after.current_usage > previous);
        previous = after.current_usage;
    }
    assert_eq!(previous, dec("210.49"));

    registry.reset_usage(1).await.unwrap();
    let s = registry.get_server(1).await.unwrap().unwrap();
    assert_eq!(s.current_usage, dec("0"));
    assert!(!s.is_active, "reset must not reactivate a disabled server");
}

// ── Invariants across mixed sequences ─────────────────────────

#[tokio::test]
async fn at_most_one_server_is_ever_selected() {
    let registry = registry_with(vec![]).await;

    let a = registry.add_server(new_server("a", "100.00")).await.unwrap();
    assert_one_selected(&registry, a.id).await;

    let b = registry.add_server(new_server("b", "100.00")).await.unwrap();
    assert_one_selected(&registry, a.id).await;

    registry.set_selected_server(b.id).await.unwrap();
    assert_one_selected(&registry, b.id).await;

    // Exhaust b: failover flips the pointer to a.
    registry.add_server_usage(b.id, dec("150.00")).await.unwrap();
    assert_one_selected(&registry, a.id).await;

    registry.get_next_available_server().await.unwrap();
    assert_one_selected(&registry, a.id).await;

    registry.delete_server(a.id).await.unwrap();
    let servers = registry.get_all_servers().await.unwrap();
    assert_eq!(servers.iter().filter(|s| s.is_selected).count(), 1);
}
