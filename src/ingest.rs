//! Ingestion path for pushed samples
//!
//! ```text
//! submit → validate value → lock node → append to series → heartbeat → ack
//!                 │                          │
//!                 └── ValidationError ◀──────┘ (stale timestamp)
//! ```
//!
//! A rejected sample has no side effects. An accepted sample causes exactly one
//! series append and one liveness update, both made while holding the node's
//! lease so a concurrent sweep cannot evict the node halfway through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, instrument, trace};

use crate::error::ValidationError;
use crate::storage::TimeSeriesStore;
use crate::tracker::{NodeLease, NodeTracker};
use crate::{MetricSample, MetricType};

/// Per-metric outcome of a batch report
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub accepted: Vec<MetricType>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub metric: String,
    pub error: String,
}

#[derive(Clone)]
pub struct Ingestor {
    tracker: Arc<NodeTracker>,
    store: Arc<TimeSeriesStore>,
    samples: broadcast::Sender<MetricSample>,
}

impl Ingestor {
    pub fn new(tracker: Arc<NodeTracker>, store: Arc<TimeSeriesStore>) -> Self {
        let (samples, _) = broadcast::channel(1024);
        Self {
            tracker,
            store,
            samples,
        }
    }

    /// Stream of accepted samples
    pub fn subscribe(&self) -> broadcast::Receiver<MetricSample> {
        self.samples.subscribe()
    }

    pub async fn submit(
        &self,
        client_id: &str,
        metric: MetricType,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), ValidationError> {
        self.submit_at(client_id, metric, timestamp, value, Utc::now())
            .await
    }

    /// Validate and record one sample, using `now` as the server receive time.
    #[instrument(skip(self, timestamp, now))]
    pub async fn submit_at(
        &self,
        client_id: &str,
        metric: MetricType,
        timestamp: DateTime<Utc>,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let sample = Self::build(client_id, metric, timestamp, value)?;

        let mut lease = self.tracker.acquire(client_id, now).await;
        self.apply(&mut lease, sample, now).await
    }

    /// Record a report carrying several metrics taken at the same instant.
    ///
    /// Every entry is validated and applied on its own; one bad entry does not
    /// affect the others.
    #[instrument(skip(self, timestamp, entries, now), fields(entries = entries.len()))]
    pub async fn submit_batch_at(
        &self,
        client_id: &str,
        timestamp: DateTime<Utc>,
        entries: &[(String, f64)],
        now: DateTime<Utc>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut valid = Vec::with_capacity(entries.len());

        for (name, value) in entries {
            let built = name
                .parse::<MetricType>()
                .and_then(|metric| Self::build(client_id, metric, timestamp, *value));
            match built {
                Ok(sample) => valid.push(sample),
                Err(e) => outcome.rejected.push(Rejection {
                    metric: name.clone(),
                    error: e.to_string(),
                }),
            }
        }

        if valid.is_empty() {
            return outcome;
        }

        let mut lease = self.tracker.acquire(client_id, now).await;
        for sample in valid {
            let metric = sample.metric_type;
            match self.apply(&mut lease, sample, now).await {
                Ok(()) => outcome.accepted.push(metric),
                Err(e) => outcome.rejected.push(Rejection {
                    metric: metric.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        outcome
    }

    pub async fn submit_batch(
        &self,
        client_id: &str,
        timestamp: DateTime<Utc>,
        entries: &[(String, f64)],
    ) -> BatchOutcome {
        self.submit_batch_at(client_id, timestamp, entries, Utc::now())
            .await
    }

    fn build(
        client_id: &str,
        metric: MetricType,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<MetricSample, ValidationError> {
        if client_id.trim().is_empty() {
            return Err(ValidationError::EmptyClientId);
        }
        metric.validate(value)?;

        Ok(MetricSample {
            client_id: client_id.to_string(),
            metric_type: metric,
            timestamp,
            value,
        })
    }

    async fn apply(
        &self,
        lease: &mut NodeLease,
        sample: MetricSample,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if let Err(e) = self.store.append(sample.clone()).await {
            debug!("rejected sample of {}: {e}", sample.client_id);
            return Err(e);
        }

        if let Some(event) = lease.record_sample(now) {
            self.tracker.publish(event);
        }

        trace!(
            "accepted {} = {} from {}",
            sample.metric_type, sample.value, sample.client_id
        );
        let _ = self.samples.send(sample);
        Ok(())
    }
}
