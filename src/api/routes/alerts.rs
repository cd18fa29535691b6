//! Alert endpoints

use axum::{Json, extract::State, http::StatusCode};

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::{AlertsResponse, MuteRequest};

/// GET /api/v1/alerts
pub async fn list_alerts(State(state): State<ApiState>) -> ApiResult<Json<AlertsResponse>> {
    let alerts = state.alerts.events().await?;
    let status = state.alerts.status().await?;

    Ok(Json(AlertsResponse {
        open: status.open,
        muted: status.muted,
        alerts,
    }))
}

/// POST /api/v1/alerts/mute
pub async fn mute_alerts(
    State(state): State<ApiState>,
    request: Option<Json<MuteRequest>>,
) -> StatusCode {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    state.alerts.mute_alerts(request.duration_secs).await;
    StatusCode::NO_CONTENT
}

/// DELETE /api/v1/alerts/mute
pub async fn unmute_alerts(State(state): State<ApiState>) -> StatusCode {
    state.alerts.unmute_alerts().await;
    StatusCode::NO_CONTENT
}
