//! In-memory time-series store
//!
//! Keeps one ring buffer per (client, metric) series. There is no persistence:
//! all data is lost on restart and only the most recent `capacity` samples of
//! each series are available.
//!
//! ## Locking
//!
//! The series map sits behind a `RwLock` that is only taken exclusively to
//! create or drop series. Each buffer has its own `Mutex`, so appends to
//! different series never contend with each other and readers clone a
//! consistent snapshot of a single buffer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use super::buffer::TimeSeriesBuffer;
use crate::error::ValidationError;
use crate::{MetricSample, MetricType};

/// Identifies one series
pub type SeriesKey = (String, MetricType);

/// Counters reported by the stats endpoint
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub series: usize,
    pub samples: usize,
    pub capacity_per_series: usize,
}

pub struct TimeSeriesStore {
    capacity: usize,
    series: RwLock<HashMap<SeriesKey, Arc<Mutex<TimeSeriesBuffer>>>>,
}

impl TimeSeriesStore {
    pub fn new(capacity: usize) -> Self {
        debug!("creating time-series store with {capacity} samples per series");
        Self {
            capacity,
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn buffer(&self, client_id: &str, metric: MetricType) -> Option<Arc<Mutex<TimeSeriesBuffer>>> {
        self.series
            .read()
            .await
            .get(&(client_id.to_string(), metric))
            .cloned()
    }

    async fn buffer_or_create(&self, client_id: &str, metric: MetricType) -> Arc<Mutex<TimeSeriesBuffer>> {
        if let Some(buffer) = self.buffer(client_id, metric).await {
            return buffer;
        }

        let mut series = self.series.write().await;
        series
            .entry((client_id.to_string(), metric))
            .or_insert_with(|| {
                trace!("creating series {client_id}/{metric}");
                Arc::new(Mutex::new(TimeSeriesBuffer::new(self.capacity)))
            })
            .clone()
    }

    /// Append an accepted sample to its series.
    ///
    /// Only the ingestion path writes samples. Stale samples are rejected
    /// without modifying the series.
    pub async fn append(&self, sample: MetricSample) -> Result<(), ValidationError> {
        let buffer = self.buffer_or_create(&sample.client_id, sample.metric_type).await;
        let mut buffer = buffer.lock().await;
        if let Some(evicted) = buffer.push(sample)? {
            trace!(
                "evicted sample of {}/{} at {}",
                evicted.client_id,
                evicted.metric_type,
                evicted.timestamp
            );
        }
        Ok(())
    }

    /// Newest sample of a series
    pub async fn latest(&self, client_id: &str, metric: MetricType) -> Option<MetricSample> {
        let buffer = self.buffer(client_id, metric).await?;
        let buffer = buffer.lock().await;
        buffer.latest().cloned()
    }

    /// Consistent copy of a series, oldest first
    pub async fn snapshot(&self, client_id: &str, metric: MetricType) -> Vec<MetricSample> {
        match self.buffer(client_id, metric).await {
            Some(buffer) => buffer.lock().await.to_vec(),
            None => Vec::new(),
        }
    }

    /// Drop every series of a client. Returns the number of dropped series.
    pub async fn remove_client(&self, client_id: &str) -> usize {
        let mut series = self.series.write().await;
        let before = series.len();
        series.retain(|(id, _), _| id != client_id);
        let removed = before - series.len();
        debug!("dropped {removed} series of {client_id}");
        removed
    }

    pub async fn stats(&self) -> StoreStats {
        let buffers: Vec<_> = self.series.read().await.values().cloned().collect();

        let mut samples = 0;
        for buffer in &buffers {
            samples += buffer.lock().await.len();
        }

        StoreStats {
            series: buffers.len(),
            samples,
            capacity_per_series: self.capacity,
        }
    }
}
