//! Shared API request and response types
//!
//! These types are used by both the HTTP handlers and the clients in
//! [`crate::client`], so the wire format cannot drift between them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actors::messages::AlertStatus;
use crate::alerts::AlertEvent;
use crate::ingest::Rejection;
use crate::registry::ServiceRole;
use crate::storage::StoreStats;
use crate::{MetricType, SeriesPoint};

// ============================================================================
// Ingestion
// ============================================================================

/// POST /api/v1/samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRequest {
    pub client_id: String,
    pub metric: String,
    /// Defaults to the server receive time
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleAck {
    pub client_id: String,
    pub metric: MetricType,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/v1/reports
///
/// Several metrics taken by one client at the same instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub client_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
    pub accepted: Vec<MetricType>,
    pub rejected: Vec<Rejection>,
}

/// POST /api/v1/clients/register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub client_id: String,
    #[serde(default)]
    pub address: Option<String>,
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub client_id: String,
    pub metric: MetricType,
    pub capacity: usize,
    pub samples: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub open: usize,
    pub muted: bool,
    /// Open events first, then recently resolved ones
    pub alerts: Vec<AlertEvent>,
}

/// POST /api/v1/alerts/mute
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MuteRequest {
    /// Mute until unmuted when absent
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `server` or `registry`
    pub service: String,
    pub version: String,
    pub uptime_secs: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCounts {
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub clients: ClientCounts,
    pub storage: StoreStats,
    pub alerts: AlertStatus,
}

// ============================================================================
// Registry
// ============================================================================

/// POST /registry/register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterServiceRequest {
    pub service_id: String,
    pub address: String,
    pub role: ServiceRole,
    /// Falls back to the registry's default ttl
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterServiceResponse {
    pub token: String,
    pub ttl_secs: u64,
}

/// POST /registry/renew and /registry/deregister
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupQuery {
    pub role: ServiceRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResponse {
    pub role: ServiceRole,
    pub addresses: Vec<String>,
}
