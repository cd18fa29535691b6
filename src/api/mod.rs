//! HTTP surface of the server and of the registry
//!
//! ## Server Endpoints
//!
//! - `POST /api/v1/samples` - Submit one sample
//! - `POST /api/v1/reports` - Submit several metrics of one client
//! - `POST /api/v1/clients/register` - Explicit client registration
//! - `GET /api/v1/clients` - List clients with liveness
//! - `GET /api/v1/clients/:id` - One client
//! - `GET /api/v1/clients/:id/series/:metric` - Buffered samples of a series
//! - `DELETE /api/v1/clients/:id` - Remove a client and its series
//! - `GET /api/v1/alerts` - Open and recently resolved alerts
//! - `POST|DELETE /api/v1/alerts/mute` - Mute or unmute notifications
//! - `GET /api/v1/realtime` - Cluster aggregates and their history
//! - `GET /api/v1/health`, `GET /api/v1/stats`
//! - `WS /api/v1/stream` - Live samples, node events and alerts
//!
//! ## Registry Endpoints
//!
//! - `POST /registry/register`, `POST /registry/renew`, `POST /registry/deregister`
//! - `GET /registry/lookup?role=server|client`
//! - `GET /registry/servers`, `GET /registry/clients`, `GET /registry/health`

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::{ApiState, RegistryState};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Optional bearer token required on every request
    pub auth_token: Option<String>,

    /// Enable CORS for the dashboard
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            auth_token: None,
            enable_cors: true,
        }
    }
}

impl From<&ServerSettings> for ApiConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            bind_addr: settings.bind,
            auth_token: settings.auth_token.clone(),
            enable_cors: settings.enable_cors,
        }
    }
}

/// Router of the monitoring server
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/samples", post(routes::ingest::submit_sample))
        .route("/api/v1/reports", post(routes::ingest::submit_report))
        .route("/api/v1/clients", get(routes::clients::list_clients))
        .route(
            "/api/v1/clients/register",
            post(routes::clients::register_client),
        )
        .route(
            "/api/v1/clients/:id",
            get(routes::clients::get_client).delete(routes::clients::remove_client),
        )
        .route(
            "/api/v1/clients/:id/series/:metric",
            get(routes::clients::get_series),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route(
            "/api/v1/alerts/mute",
            post(routes::alerts::mute_alerts).delete(routes::alerts::unmute_alerts),
        )
        .route("/api/v1/realtime", get(routes::realtime::get_realtime))
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Router of the registry service
pub fn registry_router(state: RegistryState) -> Router {
    Router::new()
        .route("/registry/register", post(routes::registry::register))
        .route("/registry/renew", post(routes::registry::renew))
        .route("/registry/deregister", post(routes::registry::deregister))
        .route("/registry/lookup", get(routes::registry::lookup))
        .route("/registry/servers", get(routes::registry::list_servers))
        .route("/registry/clients", get(routes::registry::list_clients))
        .route("/registry/health", get(routes::health::registry_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn serve(name: &'static str, bind_addr: SocketAddr, app: Router) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("{name} listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("{name} error: {e}");
        }
    });

    Ok(addr)
}

/// Start the monitoring API in a background task and return its local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    let app = router(&config, state);
    serve("API server", config.bind_addr, app).await
}

/// Start the registry API in a background task and return its local address.
pub async fn spawn_registry_server(
    bind_addr: SocketAddr,
    state: RegistryState,
) -> anyhow::Result<SocketAddr> {
    serve("registry", bind_addr, registry_router(state)).await
}
