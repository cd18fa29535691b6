pub mod actors;
pub mod aggregate;
pub mod alerts;
pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod ingest;
pub mod monitors;
pub mod notify;
pub mod registry;
pub mod storage;
pub mod tracker;
pub mod util;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Kind of metric a client can report.
///
/// Every kind carries its own valid value domain, checked at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Average CPU usage in percent
    Cpu,
    /// Used memory in percent
    Memory,
    /// Used disk space in percent
    Disk,
    /// Network throughput (in + out) in KiB/s
    Network,
    /// One minute load average
    Load,
}

impl MetricType {
    pub const ALL: [MetricType; 5] = [
        MetricType::Cpu,
        MetricType::Memory,
        MetricType::Disk,
        MetricType::Network,
        MetricType::Load,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::Disk => "disk",
            MetricType::Network => "network",
            MetricType::Load => "load",
        }
    }

    /// Whether values of this metric are percentages.
    pub fn is_percentage(&self) -> bool {
        matches!(self, MetricType::Cpu | MetricType::Memory | MetricType::Disk)
    }

    /// Check `value` against the valid domain of this metric.
    pub fn validate(&self, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { metric: *self });
        }

        let in_domain = if self.is_percentage() {
            (0.0..=100.0).contains(&value)
        } else {
            value >= 0.0
        };

        if in_domain {
            Ok(())
        } else {
            Err(ValidationError::OutOfRange {
                metric: *self,
                value,
            })
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(MetricType::Cpu),
            "memory" | "mem" => Ok(MetricType::Memory),
            "disk" => Ok(MetricType::Disk),
            "network" | "net" => Ok(MetricType::Network),
            "load" => Ok(MetricType::Load),
            _ => Err(ValidationError::UnknownMetric(s.to_string())),
        }
    }
}

/// A single accepted measurement. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub client_id: String,
    pub metric_type: MetricType,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A point of a chartable series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl From<&MetricSample> for SeriesPoint {
    fn from(sample: &MetricSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            value: sample.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_percentage_domain() {
        assert!(MetricType::Cpu.validate(0.0).is_ok());
        assert!(MetricType::Cpu.validate(100.0).is_ok());
        assert_matches!(
            MetricType::Memory.validate(100.5),
            Err(ValidationError::OutOfRange { .. })
        );
        assert_matches!(
            MetricType::Disk.validate(-1.0),
            Err(ValidationError::OutOfRange { .. })
        );
    }

    #[test]
    fn test_unbounded_domain() {
        assert!(MetricType::Network.validate(12_345.0).is_ok());
        assert!(MetricType::Load.validate(7.5).is_ok());
        assert_matches!(
            MetricType::Load.validate(-0.1),
            Err(ValidationError::OutOfRange { .. })
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_matches!(
            MetricType::Cpu.validate(f64::NAN),
            Err(ValidationError::NonFinite { .. })
        );
        assert_matches!(
            MetricType::Network.validate(f64::INFINITY),
            Err(ValidationError::NonFinite { .. })
        );
    }

    #[test]
    fn test_parse_metric_type() {
        assert_eq!("CPU".parse::<MetricType>().unwrap(), MetricType::Cpu);
        assert_eq!("mem".parse::<MetricType>().unwrap(), MetricType::Memory);
        assert_matches!(
            "gpu".parse::<MetricType>(),
            Err(ValidationError::UnknownMetric(name)) if name == "gpu"
        );
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&MetricType::Disk).unwrap();
        assert_eq!(json, "\"disk\"");
        let parsed: MetricType = serde_json::from_str("\"network\"").unwrap();
        assert_eq!(parsed, MetricType::Network);
    }
}
