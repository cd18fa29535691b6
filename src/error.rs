//! Error types for the monitoring core
//!
//! None of these errors is fatal to the process. Validation and registry errors
//! are returned to the submitting agent, configuration errors only skip the
//! offending rule.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::MetricType;

/// A sample was rejected at ingestion. The sample is dropped without side effects.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The client identifier was empty
    EmptyClientId,

    /// The metric name is not one of the known metric types
    UnknownMetric(String),

    /// The value is NaN or infinite
    NonFinite { metric: MetricType },

    /// The value lies outside the metric's valid domain
    OutOfRange { metric: MetricType, value: f64 },

    /// The timestamp is not newer than the last accepted sample of the series
    Stale {
        metric: MetricType,
        timestamp: DateTime<Utc>,
        last_accepted: DateTime<Utc>,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyClientId => write!(f, "client id must not be empty"),
            ValidationError::UnknownMetric(name) => write!(f, "unknown metric type '{name}'"),
            ValidationError::NonFinite { metric } => {
                write!(f, "{metric} value must be a finite number")
            }
            ValidationError::OutOfRange { metric, value } => {
                if metric.is_percentage() {
                    write!(f, "{metric} value {value} is outside of [0, 100]")
                } else {
                    write!(f, "{metric} value {value} must not be negative")
                }
            }
            ValidationError::Stale {
                metric,
                timestamp,
                last_accepted,
            } => write!(
                f,
                "{metric} sample at {} is not newer than last accepted sample at {}",
                timestamp.to_rfc3339(),
                last_accepted.to_rfc3339()
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors returned by the service registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The token is unknown or its entry lapsed; the caller must register again
    Expired,

    /// A registration was attempted with a zero ttl
    InvalidTtl,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Expired => write!(f, "registration expired, register again"),
            RegistryError::InvalidTtl => write!(f, "ttl must be greater than zero"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Invalid static configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An alert rule references a metric type that does not exist
    UnknownMetric { rule_id: String, metric: String },

    /// An alert rule uses an unsupported comparator
    UnknownComparator { rule_id: String, comparator: String },

    /// A numeric setting is out of its allowed range
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownMetric { rule_id, metric } => {
                write!(f, "rule '{rule_id}' references unknown metric '{metric}'")
            }
            ConfigError::UnknownComparator {
                rule_id,
                comparator,
            } => write!(f, "rule '{rule_id}' uses unknown comparator '{comparator}'"),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid configuration for {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
