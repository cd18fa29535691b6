//! Shared bearer token check for the server API
//!
//! Agents send `Authorization: Bearer <token>`. Browsers cannot set headers on
//! a WebSocket handshake, so the token may also come as a `token` query
//! parameter.

use axum::{
    Json,
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub async fn auth_middleware(
    State(expected): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let presented = match bearer_token(request.headers())? {
        Some(token) => token,
        None => query_token(request.uri()).ok_or(AuthError::MissingToken)?,
    };

    if presented != expected {
        debug!("rejected request to {} with invalid token", request.uri().path());
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}

/// Token from the `Authorization` header, `None` if the header is absent
fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| Some(token.trim().to_string()))
        .ok_or(AuthError::InvalidFormat)
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token
}

#[derive(Debug, PartialEq)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing bearer token"),
            AuthError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "malformed Authorization header, expected `Bearer <token>`",
            ),
            AuthError::InvalidToken => (StatusCode::FORBIDDEN, "invalid token"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
