//! payrelay — multi-server payment proxy registry and selector.
//!
//! A storefront delegates PayPal capture to one of several upstream proxy
//! endpoints. This crate keeps the registry of those endpoints, tracks the
//! monetary volume each one has processed against a per-server capacity
//! ceiling, and decides which endpoint the next checkout should use,
//! failing the selection over when a ceiling is reached.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod notification;
pub mod registry;
pub mod store;

use notification::webhook::WebhookNotifier;
use registry::ServerRegistry;

/// Shared application state passed to handlers and background jobs.
pub struct AppState {
    pub registry: ServerRegistry,
    pub webhook: WebhookNotifier,
    pub config: config::Config,
}
