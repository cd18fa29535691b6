//! Actor-based monitoring core
//!
//! Every periodic job runs as an independent tokio task on its own timer and
//! communicates through channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!            POST samples / reports
//!                     │
//!               ┌─────▼─────┐   append    ┌────────────────┐
//!               │ Ingestor  ├────────────▶│ TimeSeriesStore│
//!               └─────┬─────┘             └───────▲────────┘
//!                     │ heartbeat                 │ snapshots
//!               ┌─────▼──────┐  sweep   ┌─────────┴──────────┐
//!               │ NodeTracker│◀─────────┤ LivenessActor      │
//!               └─────┬──────┘          │ AlertActor         │
//!                     │ NodeEvents      │ AggregatorActor    │
//!                     └────────────────▶└────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Events**: node events, alert transitions and accepted samples are
//!    published on broadcast channels
//! 3. **Request/Response**: oneshot channels for queries

pub mod aggregator;
pub mod alert;
pub mod liveness;
pub mod messages;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::aggregate::Aggregator;
use crate::alerts::AlertEngine;
use crate::config::Config;
use crate::ingest::Ingestor;
use crate::notify::{Notifier, WebhookNotifier};
use crate::storage::TimeSeriesStore;
use crate::tracker::NodeTracker;

use self::aggregator::AggregatorHandle;
use self::alert::AlertHandle;
use self::liveness::LivenessHandle;

/// The running monitoring core: shared state plus the handles of its actors
#[derive(Clone)]
pub struct Monitor {
    pub store: Arc<TimeSeriesStore>,
    pub tracker: Arc<NodeTracker>,
    pub ingestor: Ingestor,
    pub liveness: LivenessHandle,
    pub alerts: AlertHandle,
    pub aggregator: AggregatorHandle,
}

impl Monitor {
    /// Create the shared state and spawn all actors.
    pub fn spawn(config: &Config) -> Self {
        let notifier = config
            .alerts
            .webhook
            .as_ref()
            .map(|webhook| Arc::new(WebhookNotifier::new(webhook)) as Arc<dyn Notifier>);
        Self::spawn_with_notifier(config, notifier)
    }

    pub fn spawn_with_notifier(config: &Config, notifier: Option<Arc<dyn Notifier>>) -> Self {
        let store = Arc::new(TimeSeriesStore::new(config.storage.capacity));
        let tracker = Arc::new(NodeTracker::new(&config.tracker, store.clone()));
        let ingestor = Ingestor::new(tracker.clone(), store.clone());

        let liveness = LivenessHandle::spawn(
            tracker.clone(),
            Duration::from_secs(config.tracker.sweep_interval_secs),
        );

        let engine = AlertEngine::new(
            &config.alerts.rules,
            config.alerts.expected_interval(),
            config.alerts.history,
        );
        let alerts = AlertHandle::spawn(
            engine,
            tracker.clone(),
            store.clone(),
            notifier,
            Duration::from_secs(config.alerts.evaluation_interval_secs),
        );

        let aggregator = AggregatorHandle::spawn(
            Aggregator::new(&config.aggregator),
            tracker.clone(),
            store.clone(),
            Duration::from_secs(config.aggregator.interval_secs),
        );

        info!(
            "monitor started (timeout {}s, eviction after {}s, {} samples per series)",
            config.tracker.timeout_secs, config.tracker.eviction_horizon_secs, config.storage.capacity
        );

        Self {
            store,
            tracker,
            ingestor,
            liveness,
            alerts,
            aggregator,
        }
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.liveness.shutdown().await {
            warn!("failed to stop liveness actor: {e}");
        }
        self.alerts.shutdown().await;
        self.aggregator.shutdown().await;
    }
}
