//! Registry endpoints, served by the registry process

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::RegistryState;
use crate::api::types::{
    LookupQuery, LookupResponse, RegisterServiceRequest, RegisterServiceResponse, TokenRequest,
};
use crate::registry::{RegistryEntry, ServiceRole};

/// POST /registry/register
pub async fn register(
    State(state): State<RegistryState>,
    Json(request): Json<RegisterServiceRequest>,
) -> ApiResult<(StatusCode, Json<RegisterServiceResponse>)> {
    if request.service_id.trim().is_empty() || request.address.trim().is_empty() {
        return Err(ApiError::Validation(
            "service id and address must not be empty".to_string(),
        ));
    }

    let ttl_secs = request.ttl_secs.unwrap_or(state.default_ttl_secs);
    let token = state
        .registry
        .register(&request.service_id, &request.address, request.role, ttl_secs)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterServiceResponse { token, ttl_secs }),
    ))
}

/// POST /registry/renew
///
/// 410 Gone tells the caller to register again.
pub async fn renew(
    State(state): State<RegistryState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<StatusCode> {
    state.registry.renew(&request.token)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /registry/deregister
pub async fn deregister(
    State(state): State<RegistryState>,
    Json(request): Json<TokenRequest>,
) -> StatusCode {
    state.registry.deregister(&request.token);
    StatusCode::NO_CONTENT
}

/// GET /registry/lookup?role=server
pub async fn lookup(
    State(state): State<RegistryState>,
    Query(query): Query<LookupQuery>,
) -> Json<LookupResponse> {
    Json(LookupResponse {
        role: query.role,
        addresses: state.registry.lookup(query.role),
    })
}

/// GET /registry/servers
pub async fn list_servers(State(state): State<RegistryState>) -> Json<Vec<RegistryEntry>> {
    Json(state.registry.entries(ServiceRole::Server))
}

/// GET /registry/clients
pub async fn list_clients(State(state): State<RegistryState>) -> Json<Vec<RegistryEntry>> {
    Json(state.registry.entries(ServiceRole::Client))
}
