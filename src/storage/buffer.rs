//! Fixed-capacity ring buffer of samples for one (client, metric) series

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::MetricSample;
use crate::error::ValidationError;

/// Ordered history of one series.
///
/// Holds at most `capacity` samples with strictly increasing timestamps.
/// When full, pushing a new sample evicts the oldest one.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    capacity: usize,
    samples: VecDeque<MetricSample>,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, returning the evicted sample if the buffer was full.
    ///
    /// Samples that are not newer than the last accepted one are rejected and
    /// leave the buffer untouched.
    pub fn push(&mut self, sample: MetricSample) -> Result<Option<MetricSample>, ValidationError> {
        if let Some(last) = self.samples.back()
            && sample.timestamp <= last.timestamp
        {
            return Err(ValidationError::Stale {
                metric: sample.metric_type,
                timestamp: sample.timestamp,
                last_accepted: last.timestamp,
            });
        }

        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };

        self.samples.push_back(sample);
        Ok(evicted)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|s| s.timestamp)
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MetricSample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<MetricSample> {
        self.samples.iter().cloned().collect()
    }
}
