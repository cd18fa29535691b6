//! Server statistics endpoint

use axum::{Json, extract::State};
use chrono::Utc;

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::{ClientCounts, StatsResponse};

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let now = Utc::now();
    let (online, offline) = state.tracker.counts().await;
    let storage = state.store.stats().await;
    let alerts = state.alerts.status().await?;

    Ok(Json(StatsResponse {
        timestamp: now,
        uptime_secs: (now - state.started_at).num_seconds(),
        clients: ClientCounts { online, offline },
        storage,
        alerts,
    }))
}
