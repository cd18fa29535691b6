//! Cluster overview polled by the dashboard

use axum::{Json, extract::State};

use crate::aggregate::RealtimeSnapshot;
use crate::api::error::ApiResult;
use crate::api::state::ApiState;

/// GET /api/v1/realtime
///
/// Current cluster means per metric plus their recent history. Metrics
/// without any online contributor are `null`.
pub async fn get_realtime(State(state): State<ApiState>) -> ApiResult<Json<RealtimeSnapshot>> {
    Ok(Json(state.aggregator.snapshot().await?))
}
