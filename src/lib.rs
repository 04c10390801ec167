//! `morpho_risk_core`: a DeFi asset risk-monitoring and scoring core.
//!
//! The library owns every piece of shared state and the C12 observability
//! router; `main.rs` is thin wiring — it builds one `AppState` from
//! `Config::from_env()` and spawns the scheduling drivers described in
//! spec §5 around it.

pub mod alerts;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod config_doc;
pub mod db;
pub mod dispatcher;
pub mod fetchers;
pub mod handlers;
pub mod metrics;
pub mod notifier;
pub mod registry;
pub mod scoring;
pub mod store;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{
    catalog::Catalog, config::Config, db::Database, dispatcher::Dispatcher, metrics::Metrics,
    registry::Registry, store::Store,
};

/// Everything the C12 HTTP surface and the scheduling drivers in `main.rs`
/// share. Cloned cheaply (every field is itself an `Arc`/pool handle).
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub registry: Registry,
    pub store: Store,
    pub catalog: Catalog,
    pub dispatcher: Dispatcher,
    pub metrics: Metrics,
}

/// The minimal admin/observability surface spec §4's C12 names: `/health`,
/// `/metrics`, `/api/assets`, `/api/assets/:symbol/score`,
/// `/api/alerts/active`. No auth, rate limiting, or CORS layer — this
/// surface is an internal operator API, not the public-facing one the
/// teacher built (see DESIGN.md).
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/assets", get(handlers::list_assets))
        .route("/api/assets/:symbol/score", get(handlers::asset_score))
        .route("/api/alerts/active", get(handlers::active_alerts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
