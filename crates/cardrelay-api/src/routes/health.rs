use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pool_size: usize,
    pub pool_target: usize,
    pub sessions: usize,
    pub active_turns: usize,
}

/// Health check endpoint
///
/// Reports pool fill level alongside session and turn counts. An empty pool
/// is reported as `degraded` since every turn then pays for a direct creation.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    let pool_size = orchestrator.pool().size();

    Json(HealthResponse {
        status: if pool_size > 0 { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pool_size,
        pool_target: orchestrator.pool().target(),
        sessions: orchestrator.sessions().len(),
        active_turns: orchestrator.turns().active_turns(),
    })
}
