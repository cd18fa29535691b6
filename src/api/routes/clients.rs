//! Client (node) endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;

use crate::MetricType;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{RegisterClientRequest, SeriesResponse};
use crate::error::ValidationError;
use crate::tracker::ClientNode;

/// GET /api/v1/clients
pub async fn list_clients(State(state): State<ApiState>) -> Json<Vec<ClientNode>> {
    Json(state.tracker.list().await)
}

/// GET /api/v1/clients/:id
pub async fn get_client(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<ClientNode>> {
    state
        .tracker
        .get(&client_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("client '{client_id}' not found")))
}

/// GET /api/v1/clients/:id/series/:metric
pub async fn get_series(
    State(state): State<ApiState>,
    Path((client_id, metric)): Path<(String, String)>,
) -> ApiResult<Json<SeriesResponse>> {
    let metric = metric
        .parse::<MetricType>()
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    if state.tracker.get(&client_id).await.is_none() {
        return Err(ApiError::NotFound(format!("client '{client_id}' not found")));
    }

    let samples = state.store.snapshot(&client_id, metric).await;

    Ok(Json(SeriesResponse {
        client_id,
        metric,
        capacity: state.store.capacity(),
        samples: samples.iter().map(Into::into).collect(),
    }))
}

/// POST /api/v1/clients/register
pub async fn register_client(
    State(state): State<ApiState>,
    Json(request): Json<RegisterClientRequest>,
) -> ApiResult<Json<ClientNode>> {
    if request.client_id.trim().is_empty() {
        return Err(ValidationError::EmptyClientId.into());
    }

    let node = state
        .tracker
        .register_client(&request.client_id, request.address, Utc::now())
        .await;
    Ok(Json(node))
}

/// DELETE /api/v1/clients/:id
///
/// Removes the client and its series immediately.
pub async fn remove_client(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<ClientNode>> {
    state
        .tracker
        .remove_client(&client_id, Utc::now())
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("client '{client_id}' not found")))
}
