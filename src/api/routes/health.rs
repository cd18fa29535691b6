//! Liveness probes of the server and the registry

use axum::{Json, extract::State};
use chrono::Utc;

use crate::api::state::{ApiState, RegistryState};
use crate::api::types::HealthResponse;

/// GET /api/v1/health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now,
    })
}

/// GET /registry/health
pub async fn registry_health(State(state): State<RegistryState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "registry".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now,
    })
}
