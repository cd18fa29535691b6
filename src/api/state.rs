//! Shared state handed to the API handlers

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::actors::Monitor;
use crate::actors::aggregator::AggregatorHandle;
use crate::actors::alert::AlertHandle;
use crate::ingest::Ingestor;
use crate::registry::Registry;
use crate::storage::TimeSeriesStore;
use crate::tracker::NodeTracker;

/// State of the monitoring server API
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<TimeSeriesStore>,
    pub tracker: Arc<NodeTracker>,
    pub ingestor: Ingestor,
    pub alerts: AlertHandle,
    pub aggregator: AggregatorHandle,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(monitor: &Monitor) -> Self {
        Self {
            store: monitor.store.clone(),
            tracker: monitor.tracker.clone(),
            ingestor: monitor.ingestor.clone(),
            alerts: monitor.alerts.clone(),
            aggregator: monitor.aggregator.clone(),
            started_at: Utc::now(),
        }
    }
}

/// State of the registry API
#[derive(Clone)]
pub struct RegistryState {
    pub registry: Arc<Registry>,
    /// Used when a registration does not carry its own ttl
    pub default_ttl_secs: u64,
    pub started_at: DateTime<Utc>,
}

impl RegistryState {
    pub fn new(registry: Arc<Registry>, default_ttl_secs: u64) -> Self {
        Self {
            registry,
            default_ttl_secs,
            started_at: Utc::now(),
        }
    }
}
