//! Router assembly and HTTP middleware.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, create_asset_handler, create_peer_handler, create_wallet_address_handler,
    get_asset_handler, get_peer_handler, get_wallet_address_handler, health_check_handler,
    ledger_credit_handler, ledger_debit_handler, list_asset_peers_handler, list_assets_handler,
    list_peers_handler, list_wallet_addresses_handler, list_webhook_events_handler,
    liveness_handler, lookup_wallet_address_handler, readiness_handler, trigger_events_handler,
};

/// HTTP middleware settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Upper bound on handler time, including lookup-or-wait polling
    pub request_timeout: Duration,
    /// Maximum accepted request body in bytes
    pub body_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            body_limit: 1024 * 1024,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let request_timeout = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        let body_limit = env::var("REQUEST_BODY_LIMIT_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.body_limit);

        Self {
            request_timeout,
            body_limit,
        }
    }
}

/// Create the router with default middleware settings
pub fn create_router(state: Arc<AppState>) -> Router {
    create_router_with_config(state, RouterConfig::default())
}

pub fn create_router_with_config(state: Arc<AppState>, config: RouterConfig) -> Router {
    let api = Router::new()
        .route("/assets", get(list_assets_handler).post(create_asset_handler))
        .route("/assets/{id}", get(get_asset_handler))
        .route("/assets/{id}/peers", get(list_asset_peers_handler))
        .route("/peers", get(list_peers_handler).post(create_peer_handler))
        .route("/peers/{id}", get(get_peer_handler))
        .route(
            "/wallet-addresses",
            get(list_wallet_addresses_handler).post(create_wallet_address_handler),
        )
        .route("/wallet-addresses/lookup", get(lookup_wallet_address_handler))
        .route("/wallet-addresses/{id}", get(get_wallet_address_handler))
        .route("/webhook-events", get(list_webhook_events_handler))
        .route("/internal/ledger/credit", post(ledger_credit_handler))
        .route("/internal/ledger/debit", post(ledger_debit_handler))
        .route("/internal/scheduler/trigger", post(trigger_events_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler));

    api.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(RequestBodyLimitLayer::new(config.body_limit))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
