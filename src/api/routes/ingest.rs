//! Ingestion endpoints used by the agents

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;

use crate::MetricType;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{ReportRequest, ReportResponse, SampleAck, SampleRequest};

/// POST /api/v1/samples
///
/// 202 once the sample is recorded, 422 with the validation error otherwise.
pub async fn submit_sample(
    State(state): State<ApiState>,
    Json(request): Json<SampleRequest>,
) -> ApiResult<(StatusCode, Json<SampleAck>)> {
    let now = Utc::now();
    let metric = request.metric.parse::<MetricType>()?;
    let timestamp = request.timestamp.unwrap_or(now);

    state
        .ingestor
        .submit_at(&request.client_id, metric, timestamp, request.value, now)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SampleAck {
            client_id: request.client_id,
            metric,
            timestamp,
        }),
    ))
}

/// POST /api/v1/reports
///
/// Every metric of the report is accepted or rejected on its own. The
/// response is 202 if at least one metric was recorded and 422 otherwise.
pub async fn submit_report(
    State(state): State<ApiState>,
    Json(request): Json<ReportRequest>,
) -> ApiResult<(StatusCode, Json<ReportResponse>)> {
    if request.metrics.is_empty() {
        return Err(ApiError::Validation("report carries no metrics".to_string()));
    }

    let now = Utc::now();
    let timestamp = request.timestamp.unwrap_or(now);
    let entries: Vec<(String, f64)> = request.metrics.into_iter().collect();

    let outcome = state
        .ingestor
        .submit_batch_at(&request.client_id, timestamp, &entries, now)
        .await;

    let status = if outcome.accepted.is_empty() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        Json(ReportResponse {
            client_id: request.client_id,
            timestamp,
            accepted: outcome.accepted,
            rejected: outcome.rejected,
        }),
    ))
}
