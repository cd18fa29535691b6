//! Liveness tracking of client nodes
//!
//! ## State Machine
//!
//! ```text
//!   (unknown) ──sample/register──▶ Online ──silent > timeout──▶ Offline
//!                                     ▲                            │
//!                                     └──────────sample────────────┤
//!                                                                  │
//!                                        silent > eviction horizon ▼
//!                                                               (evicted)
//! ```
//!
//! Liveness is re-evaluated by a periodic [`NodeTracker::sweep_at`] instead of
//! one timer per node, so detection lags by at most one sweep interval.
//!
//! ## Locking
//!
//! Every node lives in its own slot guarded by a `Mutex`. Ingestion holds the
//! slot (through a [`NodeLease`]) while it appends to the node's series, and
//! the sweep holds it while it drops the series of an evicted node. An in-flight
//! sample therefore either lands before the eviction and is dropped with the
//! node, or lands after it and re-creates the node from scratch. The node map
//! itself is only write-locked to insert or remove a slot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, broadcast};
use tracing::{debug, info, trace};

use crate::config::TrackerConfig;
use crate::storage::TimeSeriesStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored client as seen by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientNode {
    pub client_id: String,

    /// Address reported at explicit registration
    pub address: Option<String>,

    pub first_seen_at: DateTime<Utc>,

    /// Server time of the last accepted sample (or registration)
    pub last_sample_at: DateTime<Utc>,

    pub status: NodeStatus,

    /// When the sweep marked the node offline
    pub offline_since: Option<DateTime<Utc>>,
}

impl ClientNode {
    fn new(client_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.to_string(),
            address: None,
            first_seen_at: now,
            last_sample_at: now,
            status: NodeStatus::Online,
            offline_since: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }
}

/// Liveness changes published by the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// First sample or registration of an unknown node
    Joined { client_id: String, at: DateTime<Utc> },

    /// An offline node delivered a sample again
    CameOnline { client_id: String, at: DateTime<Utc> },

    /// The sweep found the node silent for longer than the timeout
    WentOffline { client_id: String, at: DateTime<Utc> },

    /// The node was removed together with its series
    Evicted { client_id: String, at: DateTime<Utc> },
}

impl NodeEvent {
    pub fn client_id(&self) -> &str {
        match self {
            NodeEvent::Joined { client_id, .. }
            | NodeEvent::CameOnline { client_id, .. }
            | NodeEvent::WentOffline { client_id, .. }
            | NodeEvent::Evicted { client_id, .. } => client_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeEvent::Joined { .. } => "joined",
            NodeEvent::CameOnline { .. } => "online",
            NodeEvent::WentOffline { .. } => "offline",
            NodeEvent::Evicted { .. } => "evicted",
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            NodeEvent::Joined { at, .. }
            | NodeEvent::CameOnline { at, .. }
            | NodeEvent::WentOffline { at, .. }
            | NodeEvent::Evicted { at, .. } => *at,
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub went_offline: Vec<String>,
    pub evicted: Vec<ClientNode>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.went_offline.is_empty() && self.evicted.is_empty()
    }
}

#[derive(Debug)]
struct NodeSlot {
    node: ClientNode,
    evicted: bool,
    fresh: bool,
}

type Slot = Arc<Mutex<NodeSlot>>;

/// Exclusive access to one node, held by ingestion across a buffer append.
pub struct NodeLease {
    guard: OwnedMutexGuard<NodeSlot>,
}

impl NodeLease {
    pub fn node(&self) -> &ClientNode {
        &self.guard.node
    }

    /// Record an accepted sample. Returns the liveness change it caused, if any.
    pub fn record_sample(&mut self, now: DateTime<Utc>) -> Option<NodeEvent> {
        let slot = &mut *self.guard;
        let client_id = slot.node.client_id.clone();

        if now > slot.node.last_sample_at {
            slot.node.last_sample_at = now;
        }

        if std::mem::take(&mut slot.fresh) {
            return Some(NodeEvent::Joined { client_id, at: now });
        }

        if slot.node.status == NodeStatus::Offline {
            slot.node.status = NodeStatus::Online;
            slot.node.offline_since = None;
            return Some(NodeEvent::CameOnline { client_id, at: now });
        }

        None
    }

    fn set_address(&mut self, address: Option<String>) {
        if address.is_some() {
            self.guard.node.address = address;
        }
    }
}

pub struct NodeTracker {
    timeout: Duration,
    eviction_horizon: Duration,
    nodes: RwLock<HashMap<String, Slot>>,
    store: Arc<TimeSeriesStore>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeTracker {
    pub fn new(config: &TrackerConfig, store: Arc<TimeSeriesStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            timeout: config.timeout(),
            eviction_horizon: config.eviction_horizon(),
            nodes: RwLock::new(HashMap::new()),
            store,
            events,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn eviction_horizon(&self) -> Duration {
        self.eviction_horizon
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: NodeEvent) {
        trace!("node event: {} {}", event.kind(), event.client_id());
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn slot_or_create(&self, client_id: &str, now: DateTime<Utc>) -> Slot {
        if let Some(slot) = self.nodes.read().await.get(client_id) {
            return slot.clone();
        }

        let mut nodes = self.nodes.write().await;
        nodes
            .entry(client_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(NodeSlot {
                    node: ClientNode::new(client_id, now),
                    evicted: false,
                    fresh: true,
                }))
            })
            .clone()
    }

    async fn discard_slot(&self, client_id: &str, slot: &Slot) {
        let mut nodes = self.nodes.write().await;
        if nodes.get(client_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            nodes.remove(client_id);
        }
    }

    /// Lock a node for ingestion, creating it if it is unknown.
    pub async fn acquire(&self, client_id: &str, now: DateTime<Utc>) -> NodeLease {
        loop {
            let slot = self.slot_or_create(client_id, now).await;
            let guard = slot.clone().lock_owned().await;
            if !guard.evicted {
                return NodeLease { guard };
            }

            // lost the race against an eviction, start over with a new node
            drop(guard);
            self.discard_slot(client_id, &slot).await;
        }
    }

    /// Explicit registration of a client, marking it online.
    pub async fn register_client(
        &self,
        client_id: &str,
        address: Option<String>,
        now: DateTime<Utc>,
    ) -> ClientNode {
        let mut lease = self.acquire(client_id, now).await;
        lease.set_address(address);
        let event = lease.record_sample(now);
        let node = lease.node().clone();
        drop(lease);

        if let Some(event) = event {
            self.publish(event);
        }
        debug!("client {client_id} registered");
        node
    }

    pub async fn get(&self, client_id: &str) -> Option<ClientNode> {
        let slot = self.nodes.read().await.get(client_id).cloned()?;
        let slot = slot.lock().await;
        (!slot.evicted).then(|| slot.node.clone())
    }

    async fn slots(&self) -> Vec<(String, Slot)> {
        self.nodes
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect()
    }

    /// All known nodes, ordered by client id
    pub async fn list(&self) -> Vec<ClientNode> {
        let mut nodes = Vec::new();
        for (_, slot) in self.slots().await {
            let slot = slot.lock().await;
            if !slot.evicted {
                nodes.push(slot.node.clone());
            }
        }
        nodes.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        nodes
    }

    /// Ids of all nodes currently online, ordered
    pub async fn online_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(ClientNode::is_online)
            .map(|node| node.client_id)
            .collect();
        ids.sort();
        ids
    }

    /// Remove a node immediately, dropping its series.
    pub async fn remove_client(&self, client_id: &str, now: DateTime<Utc>) -> Option<ClientNode> {
        let slot = self.nodes.read().await.get(client_id).cloned()?;

        let node = {
            let mut guard = slot.lock().await;
            if guard.evicted {
                return None;
            }
            self.evict(&mut guard, client_id).await
        };

        self.discard_slot(client_id, &slot).await;
        self.publish(NodeEvent::Evicted {
            client_id: client_id.to_string(),
            at: now,
        });
        info!("client {client_id} removed");
        Some(node)
    }

    async fn evict(&self, slot: &mut NodeSlot, client_id: &str) -> ClientNode {
        slot.evicted = true;
        slot.node.status = NodeStatus::Offline;
        self.store.remove_client(client_id).await;
        slot.node.clone()
    }

    /// Re-evaluate the liveness of every node.
    ///
    /// Nodes silent for longer than the timeout go offline, nodes silent for
    /// longer than the eviction horizon are removed along with their series.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut removed = Vec::new();

        for (client_id, slot) in self.slots().await {
            let mut guard = slot.lock().await;
            if guard.evicted {
                continue;
            }

            let silent_for = now - guard.node.last_sample_at;

            if silent_for > self.eviction_horizon {
                debug!("evicting {client_id}, silent for {}s", silent_for.num_seconds());
                let node = self.evict(&mut guard, &client_id).await;
                report.evicted.push(node);
                drop(guard);
                removed.push((client_id, slot));
            } else if silent_for > self.timeout && guard.node.status == NodeStatus::Online {
                debug!("{client_id} went offline, silent for {}s", silent_for.num_seconds());
                guard.node.status = NodeStatus::Offline;
                guard.node.offline_since = Some(now);
                report.went_offline.push(client_id);
            }
        }

        if !removed.is_empty() {
            let mut nodes = self.nodes.write().await;
            for (client_id, slot) in &removed {
                if nodes.get(client_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
                    nodes.remove(client_id);
                }
            }
        }

        for client_id in &report.went_offline {
            self.publish(NodeEvent::WentOffline {
                client_id: client_id.clone(),
                at: now,
            });
        }
        for node in &report.evicted {
            self.publish(NodeEvent::Evicted {
                client_id: node.client_id.clone(),
                at: now,
            });
        }

        report
    }

    pub async fn counts(&self) -> (usize, usize) {
        let nodes = self.list().await;
        let online = nodes.iter().filter(|n| n.is_online()).count();
        (online, nodes.len() - online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetricSample, MetricType};
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn tracker(timeout: u64, horizon: u64) -> (NodeTracker, Arc<TimeSeriesStore>) {
        let store = Arc::new(TimeSeriesStore::new(16));
        let config = TrackerConfig {
            timeout_secs: timeout,
            eviction_horizon_secs: horizon,
            sweep_interval_secs: 5,
        };
        (NodeTracker::new(&config, store.clone()), store)
    }

    async fn heartbeat(tracker: &NodeTracker, client_id: &str, at: DateTime<Utc>) -> Option<NodeEvent> {
        let mut lease = tracker.acquire(client_id, at).await;
        lease.record_sample(at)
    }

    #[tokio::test]
    async fn test_first_sample_joins_online() {
        let (tracker, _) = tracker(60, 120);

        let event = heartbeat(&tracker, "node-1", t(0)).await;
        assert_matches!(event, Some(NodeEvent::Joined { .. }));

        let node = tracker.get("node-1").await.unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.first_seen_at, t(0));
        assert_eq!(node.last_sample_at, t(0));

        assert_eq!(heartbeat(&tracker, "node-1", t(5)).await, None);
        assert_eq!(tracker.get("node-1").await.unwrap().last_sample_at, t(5));
    }

    #[tokio::test]
    async fn test_offline_then_evicted() {
        let (tracker, store) = tracker(60, 120);
        heartbeat(&tracker, "node-1", t(0)).await;
        store
            .append(MetricSample {
                client_id: "node-1".to_string(),
                metric_type: MetricType::Cpu,
                timestamp: t(0),
                value: 10.0,
            })
            .await
            .unwrap();

        let report = tracker.sweep_at(t(30)).await;
        assert!(report.is_empty());

        let report = tracker.sweep_at(t(65)).await;
        assert_eq!(report.went_offline, vec!["node-1".to_string()]);
        let node = tracker.get("node-1").await.unwrap();
        assert_eq!(node.status, NodeStatus::Offline);
        assert_eq!(node.offline_since, Some(t(65)));

        // already offline, nothing new to report
        assert!(tracker.sweep_at(t(100)).await.is_empty());

        let report = tracker.sweep_at(t(130)).await;
        assert_eq!(report.evicted.len(), 1);
        assert!(tracker.get("node-1").await.is_none());
        assert!(store.snapshot("node-1", MetricType::Cpu).await.is_empty());
    }

    #[tokio::test]
    async fn test_sample_brings_offline_node_back() {
        let (tracker, _) = tracker(60, 120);
        heartbeat(&tracker, "node-1", t(0)).await;
        tracker.sweep_at(t(65)).await;

        let event = heartbeat(&tracker, "node-1", t(70)).await;
        assert_matches!(event, Some(NodeEvent::CameOnline { .. }));

        let node = tracker.get("node-1").await.unwrap();
        assert!(node.is_online());
        assert_eq!(node.offline_since, None);
        assert_eq!(node.first_seen_at, t(0));
    }

    #[tokio::test]
    async fn test_sample_after_eviction_creates_new_node() {
        let (tracker, _) = tracker(60, 120);
        heartbeat(&tracker, "node-1", t(0)).await;
        tracker.sweep_at(t(130)).await;
        assert!(tracker.get("node-1").await.is_none());

        let event = heartbeat(&tracker, "node-1", t(140)).await;
        assert_matches!(event, Some(NodeEvent::Joined { .. }));
        assert_eq!(tracker.get("node-1").await.unwrap().first_seen_at, t(140));
    }

    #[tokio::test]
    async fn test_events_published() {
        let (tracker, _) = tracker(60, 120);
        let mut events = tracker.subscribe();

        tracker.register_client("node-1", Some("10.0.0.5".to_string()), t(0)).await;
        tracker.sweep_at(t(61)).await;
        tracker.sweep_at(t(121)).await;

        assert_matches!(events.recv().await.unwrap(), NodeEvent::Joined { .. });
        assert_matches!(events.recv().await.unwrap(), NodeEvent::WentOffline { at, .. } if at == t(61));
        assert_matches!(events.recv().await.unwrap(), NodeEvent::Evicted { at, .. } if at == t(121));
    }

    #[tokio::test]
    async fn test_register_keeps_address() {
        let (tracker, _) = tracker(60, 120);
        let node = tracker
            .register_client("node-1", Some("10.0.0.5".to_string()), t(0))
            .await;
        assert_eq!(node.address.as_deref(), Some("10.0.0.5"));

        heartbeat(&tracker, "node-1", t(5)).await;
        let node = tracker.get("node-1").await.unwrap();
        assert_eq!(node.address.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_remove_client() {
        let (tracker, _) = tracker(60, 120);
        heartbeat(&tracker, "node-1", t(0)).await;
        heartbeat(&tracker, "node-2", t(0)).await;

        assert!(tracker.remove_client("node-1", t(1)).await.is_some());
        assert!(tracker.remove_client("node-1", t(2)).await.is_none());
        assert_eq!(tracker.online_ids().await, vec!["node-2".to_string()]);
        assert_eq!(tracker.counts().await, (1, 0));
    }
}
