pub mod config;
pub mod error;
pub mod feishu;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{middleware as axum_middleware, routing::{get, post}, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::middleware::logging;
use crate::routes::{health, webhook};
use crate::state::AppState;

/// Webhook and health routes with request logging, timeout and tracing layers
pub fn build_router(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/webhook/event", post(webhook::handle_event))
        .route("/webhook/card", post(webhook::handle_card))
        .layer(axum_middleware::from_fn(logging::log_request))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
