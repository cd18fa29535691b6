//! Alert rule evaluation
//!
//! ## Sustain Window
//!
//! A rule fires for a client once its condition has held without interruption
//! for the rule's sustain window:
//!
//! ```text
//!   now - sustain                              now
//!        │                                      │
//!   ─────●──────●──────●──────●──────●──────────┤
//!        ▲      └gap ≤ expected interval┘  ▲
//!   run reaches the window start      newest sample no older
//!                                     than the expected interval
//! ```
//!
//! Every sample of the trailing run must satisfy the condition, consecutive
//! samples may be at most `expected_interval` apart, and the run must reach back
//! to the window start. A sparse or missing series never counts as sustained.
//!
//! ## Event Lifecycle
//!
//! ```text
//!   no event ──sustained──▶ open ──newest sample violates──▶ resolved (recovered)
//!                             └────────node evicted────────▶ resolved (node lost)
//! ```
//!
//! There is at most one open event per (rule, client).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::AlertRuleConfig;
use crate::error::ConfigError;
use crate::storage::TimeSeriesStore;
use crate::tracker::NodeTracker;
use crate::{MetricSample, MetricType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Greater => value > threshold,
            Comparator::GreaterOrEqual => value >= threshold,
            Comparator::Less => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(Comparator::Greater),
            ">=" | "ge" => Ok(Comparator::GreaterOrEqual),
            "<" | "lt" => Ok(Comparator::Less),
            "<=" | "le" => Ok(Comparator::LessOrEqual),
            other => Err(other.to_string()),
        }
    }
}

/// A validated alert rule
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub id: String,
    pub metric: MetricType,
    pub comparator: Comparator,
    pub threshold: f64,
    pub sustain: Duration,
    pub severity: Severity,
}

impl AlertRule {
    pub fn from_config(config: &AlertRuleConfig) -> Result<Self, ConfigError> {
        let metric = config
            .metric
            .parse::<MetricType>()
            .map_err(|_| ConfigError::UnknownMetric {
                rule_id: config.id.clone(),
                metric: config.metric.clone(),
            })?;

        let comparator =
            config
                .comparator
                .parse::<Comparator>()
                .map_err(|comparator| ConfigError::UnknownComparator {
                    rule_id: config.id.clone(),
                    comparator,
                })?;

        Ok(Self {
            id: config.id.clone(),
            metric,
            comparator,
            threshold: config.threshold,
            sustain: Duration::seconds(config.sustain_secs as i64),
            severity: config.severity,
        })
    }

    pub fn holds(&self, value: f64) -> bool {
        self.comparator.holds(value, self.threshold)
    }

    /// Whether the condition held for the whole sustain window ending at `now`.
    ///
    /// `samples` must be ordered oldest first.
    pub fn is_sustained(
        &self,
        samples: &[MetricSample],
        now: DateTime<Utc>,
        expected_interval: Duration,
    ) -> bool {
        let mut run = samples.iter().rev().skip_while(|s| s.timestamp > now);

        let Some(newest) = run.next() else {
            return false;
        };
        if now - newest.timestamp > expected_interval || !self.holds(newest.value) {
            return false;
        }

        let window_start = now - self.sustain;
        if newest.timestamp <= window_start {
            return true;
        }

        let mut previous = newest;
        for sample in run {
            if previous.timestamp - sample.timestamp > expected_interval || !self.holds(sample.value) {
                return false;
            }
            if sample.timestamp <= window_start {
                return true;
            }
            previous = sample;
        }

        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "recovered")]
    Recovered,
    #[serde(rename = "node lost")]
    NodeLost,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub rule_id: String,
    pub client_id: String,
    pub metric: MetricType,
    pub severity: Severity,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Newest value when the event opened
    pub value: f64,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
}

impl AlertEvent {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// A change of alert state, forwarded to notifiers and stream subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    Opened(AlertEvent),
    Resolved(AlertEvent),
}

impl AlertTransition {
    pub fn event(&self) -> &AlertEvent {
        match self {
            AlertTransition::Opened(event) | AlertTransition::Resolved(event) => event,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AlertTransition::Opened(_) => "opened",
            AlertTransition::Resolved(_) => "resolved",
        }
    }
}

type EventKey = (String, String);

/// Owner of all alert events
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    skipped: Vec<ConfigError>,
    expected_interval: Duration,
    open: HashMap<EventKey, AlertEvent>,
    history: VecDeque<AlertEvent>,
    history_capacity: usize,
}

impl AlertEngine {
    /// Build the engine from configured rules. Invalid rules are logged and skipped.
    pub fn new(rules: &[AlertRuleConfig], expected_interval: Duration, history_capacity: usize) -> Self {
        let mut valid = Vec::new();
        let mut skipped = Vec::new();

        for config in rules {
            match AlertRule::from_config(config) {
                Ok(rule) => valid.push(rule),
                Err(e) => {
                    warn!("skipping alert rule: {e}");
                    skipped.push(e);
                }
            }
        }

        debug!("alert engine loaded {} rules ({} skipped)", valid.len(), skipped.len());

        Self {
            rules: valid,
            skipped,
            expected_interval,
            open: HashMap::new(),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn skipped_rules(&self) -> &[ConfigError] {
        &self.skipped
    }

    /// Evaluate all rules against every online client.
    ///
    /// Open events of clients the tracker no longer knows are resolved first.
    #[instrument(skip_all)]
    pub async fn evaluate_at(
        &mut self,
        now: DateTime<Utc>,
        tracker: &NodeTracker,
        store: &TimeSeriesStore,
    ) -> Vec<AlertTransition> {
        let mut metrics: Vec<MetricType> = self.rules.iter().map(|r| r.metric).collect();
        metrics.sort();
        metrics.dedup();

        let mut transitions = self.reconcile_at(now, tracker).await;

        for client_id in tracker.online_ids().await {
            for metric in &metrics {
                let samples = store.snapshot(&client_id, *metric).await;
                transitions.extend(self.evaluate_series(&client_id, *metric, &samples, now));
            }
        }

        transitions
    }

    /// Evaluate the rules of one metric against a snapshot of one client's series.
    pub fn evaluate_series(
        &mut self,
        client_id: &str,
        metric: MetricType,
        samples: &[MetricSample],
        now: DateTime<Utc>,
    ) -> Vec<AlertTransition> {
        let newest = samples.iter().rev().find(|s| s.timestamp <= now);
        let mut transitions = Vec::new();

        for rule in self.rules.iter().filter(|r| r.metric == metric) {
            let key = (rule.id.clone(), client_id.to_string());

            if self.open.contains_key(&key) {
                let violated = newest.is_some_and(|s| !rule.holds(s.value));
                if violated && let Some(mut event) = self.open.remove(&key) {
                    event.resolved_at = Some(now);
                    event.resolution = Some(Resolution::Recovered);
                    info!("alert {} on {client_id} resolved", rule.id);
                    transitions.push(AlertTransition::Resolved(event));
                }
                continue;
            }

            if rule.is_sustained(samples, now, self.expected_interval) {
                let event = AlertEvent {
                    rule_id: rule.id.clone(),
                    client_id: client_id.to_string(),
                    metric,
                    severity: rule.severity,
                    comparator: rule.comparator,
                    threshold: rule.threshold,
                    value: newest.map(|s| s.value).unwrap_or_default(),
                    opened_at: now,
                    resolved_at: None,
                    resolution: None,
                };
                info!(
                    "alert {} on {client_id} opened ({metric} {} {})",
                    rule.id,
                    rule.comparator.symbol(),
                    rule.threshold
                );
                self.open.insert(key, event.clone());
                transitions.push(AlertTransition::Opened(event));
            }
        }

        for transition in &transitions {
            if let AlertTransition::Resolved(event) = transition {
                self.remember(event.clone());
            }
        }

        transitions
    }

    /// Resolve every open event of a client that is gone.
    pub fn resolve_client(&mut self, client_id: &str, now: DateTime<Utc>) -> Vec<AlertTransition> {
        let keys: Vec<EventKey> = self
            .open
            .keys()
            .filter(|(_, client)| client == client_id)
            .cloned()
            .collect();

        let mut transitions = Vec::new();
        for key in keys {
            if let Some(mut event) = self.open.remove(&key) {
                event.resolved_at = Some(now);
                event.resolution = Some(Resolution::NodeLost);
                info!("alert {} on {client_id} resolved, node lost", event.rule_id);
                self.remember(event.clone());
                transitions.push(AlertTransition::Resolved(event));
            }
        }
        transitions
    }

    /// Resolve the open events of every client that was evicted.
    ///
    /// Offline clients are still known to the tracker and keep their events.
    pub async fn reconcile_at(&mut self, now: DateTime<Utc>, tracker: &NodeTracker) -> Vec<AlertTransition> {
        let mut clients: Vec<String> = self.open.keys().map(|(_, client)| client.clone()).collect();
        clients.sort();
        clients.dedup();

        let mut transitions = Vec::new();
        for client_id in clients {
            if tracker.get(&client_id).await.is_none() {
                transitions.extend(self.resolve_client(&client_id, now));
            }
        }
        transitions
    }

    fn remember(&mut self, event: AlertEvent) {
        if self.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_back();
        }
        self.history.push_front(event);
    }

    pub fn open_events(&self) -> Vec<AlertEvent> {
        let mut events: Vec<AlertEvent> = self.open.values().cloned().collect();
        events.sort_by(|a, b| {
            a.opened_at
                .cmp(&b.opened_at)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        events
    }

    /// Open events (oldest first) followed by resolved events (newest first)
    pub fn events(&self) -> Vec<AlertEvent> {
        let mut events = self.open_events();
        events.extend(self.history.iter().cloned());
        events
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
