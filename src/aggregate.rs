//! Cluster-wide aggregates over online nodes
//!
//! Each tick takes the newest sample of every online node per metric and
//! reduces them to a mean and a maximum. Offline nodes never contribute. A tick
//! without any contributor yields "no data" for that metric and adds nothing to
//! the chart history.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use tracing::{instrument, trace};

use crate::config::AggregatorConfig;
use crate::storage::TimeSeriesStore;
use crate::tracker::NodeTracker;
use crate::{MetricType, SeriesPoint};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAggregate {
    pub metric: MetricType,
    pub timestamp_bucket: DateTime<Utc>,
    /// `None` when no online node reported this metric
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub contributors: usize,
}

impl ClusterAggregate {
    /// Reduce the latest values of all contributing nodes.
    pub fn from_values(metric: MetricType, timestamp_bucket: DateTime<Utc>, values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                metric,
                timestamp_bucket,
                mean: None,
                max: None,
                contributors: 0,
            };
        }

        let sum: f64 = values.iter().sum();
        let max = values.iter().copied().fold(f64::MIN, f64::max);

        Self {
            metric,
            timestamp_bucket,
            mean: Some(sum / values.len() as f64),
            max: Some(max),
            contributors: values.len(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.contributors > 0
    }
}

/// Payload of the realtime endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct RealtimeSnapshot {
    /// Current mean per metric
    pub cluster: BTreeMap<MetricType, Option<f64>>,
    pub time_series: BTreeMap<MetricType, Vec<SeriesPoint>>,
    pub aggregates: Vec<ClusterAggregate>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct Aggregator {
    interval: Duration,
    history_capacity: usize,
    latest: Vec<ClusterAggregate>,
    history: HashMap<MetricType, VecDeque<SeriesPoint>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregator {
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            interval: Duration::seconds(config.interval_secs.max(1) as i64),
            history_capacity: config.history,
            latest: Vec::new(),
            history: HashMap::new(),
            updated_at: None,
        }
    }

    fn bucket(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.duration_trunc(self.interval).unwrap_or(now)
    }

    /// Compute the aggregates of every metric type at `now`.
    #[instrument(skip_all)]
    pub async fn compute_at(
        &mut self,
        now: DateTime<Utc>,
        tracker: &NodeTracker,
        store: &TimeSeriesStore,
    ) -> Vec<ClusterAggregate> {
        let bucket = self.bucket(now);
        let online = tracker.online_ids().await;

        let mut aggregates = Vec::with_capacity(MetricType::ALL.len());
        for metric in MetricType::ALL {
            let mut values = Vec::with_capacity(online.len());
            for client_id in &online {
                if let Some(sample) = store.latest(client_id, metric).await {
                    values.push(sample.value);
                }
            }

            let aggregate = ClusterAggregate::from_values(metric, bucket, &values);
            trace!(
                "{metric}: mean={:?} max={:?} from {} nodes",
                aggregate.mean, aggregate.max, aggregate.contributors
            );
            self.record(&aggregate);
            aggregates.push(aggregate);
        }

        self.latest = aggregates.clone();
        self.updated_at = Some(now);
        aggregates
    }

    fn record(&mut self, aggregate: &ClusterAggregate) {
        let Some(mean) = aggregate.mean else {
            return;
        };
        if self.history_capacity == 0 {
            return;
        }

        let points = self.history.entry(aggregate.metric).or_default();
        let point = SeriesPoint {
            timestamp: aggregate.timestamp_bucket,
            value: mean,
        };

        // a second computation within the same bucket replaces its point
        if points.back().is_some_and(|p| p.timestamp == point.timestamp) {
            points.pop_back();
        }
        if points.len() == self.history_capacity {
            points.pop_front();
        }
        points.push_back(point);
    }

    pub fn latest(&self) -> &[ClusterAggregate] {
        &self.latest
    }

    pub fn snapshot(&self) -> RealtimeSnapshot {
        let cluster = MetricType::ALL
            .iter()
            .map(|metric| {
                let mean = self
                    .latest
                    .iter()
                    .find(|a| a.metric == *metric)
                    .and_then(|a| a.mean);
                (*metric, mean)
            })
            .collect();

        let time_series = MetricType::ALL
            .iter()
            .map(|metric| {
                let points = self
                    .history
                    .get(metric)
                    .map(|points| points.iter().copied().collect())
                    .unwrap_or_default();
                (*metric, points)
            })
            .collect();

        RealtimeSnapshot {
            cluster,
            time_series,
            aggregates: self.latest.clone(),
            updated_at: self.updated_at,
        }
    }
}
