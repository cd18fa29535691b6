use std::net::SocketAddr;

use chrono::Duration;
use tracing::trace;

use crate::alerts::Severity;
use crate::error::ConfigError;

/// Top level configuration of the monitoring server
///
/// Every section is optional; missing sections fall back to their defaults.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Base URL of the registry, e.g. `http://10.0.0.1:10640`
    pub registry_url: Option<String>,

    /// Address announced to the registry (defaults to the bind address)
    pub advertise_address: Option<String>,

    #[serde(default = "default_registration_ttl")]
    pub registration_ttl_secs: u64,

    /// Optional bearer token required by the HTTP API
    pub auth_token: Option<String>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            registry_url: None,
            advertise_address: None,
            registration_ttl_secs: default_registration_ttl(),
            auth_token: None,
            enable_cors: true,
        }
    }
}

/// Liveness tracking of client nodes
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TrackerConfig {
    /// A node without samples for longer than this is marked offline
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// A node without samples for longer than this is evicted
    #[serde(default = "default_eviction_horizon")]
    pub eviction_horizon_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl TrackerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::seconds(self.timeout_secs as i64)
    }

    pub fn eviction_horizon(&self) -> Duration {
        Duration::seconds(self.eviction_horizon_secs as i64)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            eviction_horizon_secs: default_eviction_horizon(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageConfig {
    /// Samples kept per (client, metric) series
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_tick")]
    pub evaluation_interval_secs: u64,

    /// Cadence agents are expected to report at. A larger gap breaks a sustain window.
    #[serde(default = "default_tick")]
    pub expected_interval_secs: u64,

    /// Resolved events kept for the alert listing
    #[serde(default = "default_alert_history")]
    pub history: usize,

    #[serde(default = "default_rules")]
    pub rules: Vec<AlertRuleConfig>,

    pub webhook: Option<Webhook>,
}

impl AlertConfig {
    pub fn expected_interval(&self) -> Duration {
        Duration::seconds(self.expected_interval_secs as i64)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: default_tick(),
            expected_interval_secs: default_tick(),
            history: default_alert_history(),
            rules: default_rules(),
            webhook: None,
        }
    }
}

/// Alert rule as written in the configuration file
///
/// Metric and comparator are kept as strings so that a single bad rule can be
/// skipped instead of rejecting the whole file.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct AlertRuleConfig {
    pub id: String,
    pub metric: String,
    pub comparator: String,
    pub threshold: f64,
    pub sustain_secs: u64,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_tick")]
    pub interval_secs: u64,

    /// Points kept per metric in the cluster time series
    #[serde(default = "default_aggregate_history")]
    pub history: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_tick(),
            history: default_aggregate_history(),
        }
    }
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tracker.timeout_secs", self.tracker.timeout_secs),
            ("tracker.sweep_interval_secs", self.tracker.sweep_interval_secs),
            ("alerts.evaluation_interval_secs", self.alerts.evaluation_interval_secs),
            ("alerts.expected_interval_secs", self.alerts.expected_interval_secs),
            ("aggregator.interval_secs", self.aggregator.interval_secs),
            ("server.registration_ttl_secs", self.server.registration_ttl_secs),
            ("storage.capacity", self.storage.capacity as u64),
            ("aggregator.history", self.aggregator.history as u64),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.tracker.eviction_horizon_secs <= self.tracker.timeout_secs {
            return Err(ConfigError::InvalidValue {
                field: "tracker.eviction_horizon_secs",
                reason: format!(
                    "must be greater than tracker.timeout_secs ({})",
                    self.tracker.timeout_secs
                ),
            });
        }

        Ok(())
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 10641))
}

fn default_registration_ttl() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

fn default_eviction_horizon() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_capacity() -> usize {
    120
}

fn default_tick() -> u64 {
    5
}

fn default_alert_history() -> usize {
    100
}

fn default_aggregate_history() -> usize {
    60
}

/// Warning and critical thresholds for the percentage metrics
fn default_rules() -> Vec<AlertRuleConfig> {
    let rule = |id: &str, metric: &str, threshold: f64, severity: Severity| AlertRuleConfig {
        id: id.to_string(),
        metric: metric.to_string(),
        comparator: ">".to_string(),
        threshold,
        sustain_secs: 15,
        severity,
    };

    vec![
        rule("cpu-warning", "cpu", 70.0, Severity::Warning),
        rule("cpu-critical", "cpu", 90.0, Severity::Critical),
        rule("memory-warning", "memory", 80.0, Severity::Warning),
        rule("memory-critical", "memory", 95.0, Severity::Critical),
        rule("disk-warning", "disk", 80.0, Severity::Warning),
        rule("disk-critical", "disk", 95.0, Severity::Critical),
    ]
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
