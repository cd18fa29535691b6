//! AlertActor - Periodic rule evaluation and notification
//!
//! ```text
//! Timer tick ───────▶ evaluate rules ──┐
//! NodeEvent::Evicted ▶ resolve client ─┼─▶ AlertTransition ─▶ [notifier, stream]
//!     ↑                                │
//!     └─── Commands (GetEvents, EvaluateNow, Mute, ...)
//! ```
//!
//! The actor owns the [`AlertEngine`], so all alert state changes are
//! serialized through its loop. Muting only suppresses notifications.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, instrument, trace, warn};

use crate::alerts::{AlertEngine, AlertEvent, AlertTransition};
use crate::notify::Notifier;
use crate::storage::TimeSeriesStore;
use crate::tracker::{NodeEvent, NodeTracker};

use super::messages::{AlertCommand, AlertStatus};

pub struct AlertActor {
    engine: AlertEngine,
    tracker: Arc<NodeTracker>,
    store: Arc<TimeSeriesStore>,
    notifier: Option<Arc<dyn Notifier>>,
    command_rx: mpsc::Receiver<AlertCommand>,
    node_rx: broadcast::Receiver<NodeEvent>,
    alert_tx: broadcast::Sender<AlertTransition>,
    interval_duration: Duration,

    /// `Some(None)` mutes until unmuted
    muted: Option<Option<DateTime<Utc>>>,
}

impl AlertActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: AlertEngine,
        tracker: Arc<NodeTracker>,
        store: Arc<TimeSeriesStore>,
        notifier: Option<Arc<dyn Notifier>>,
        command_rx: mpsc::Receiver<AlertCommand>,
        node_rx: broadcast::Receiver<NodeEvent>,
        alert_tx: broadcast::Sender<AlertTransition>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            engine,
            tracker,
            store,
            notifier,
            command_rx,
            node_rx,
            alert_tx,
            interval_duration,
            muted: None,
        }
    }

    fn is_muted(&mut self, now: DateTime<Utc>) -> bool {
        match self.muted {
            Some(Some(until)) if now >= until => {
                debug!("mute expired");
                self.muted = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor");

        // nothing to evaluate before the first samples arrive
        let mut ticker = interval_at(Instant::now() + self.interval_duration, self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut node_events_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate().await;
                }

                result = self.node_rx.recv(), if node_events_open => {
                    match result {
                        Ok(NodeEvent::Evicted { client_id, at }) => {
                            let transitions = self.engine.resolve_client(&client_id, at);
                            self.publish(&transitions, at);
                        }
                        Ok(event) => {
                            trace!("ignoring node event {} of {}", event.kind(), event.client_id());
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("alert actor lagged, skipped {skipped} node events");
                            let now = Utc::now();
                            let transitions = self.engine.reconcile_at(now, &self.tracker).await;
                            self.publish(&transitions, now);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            trace!("node event channel closed");
                            node_events_open = false;
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        AlertCommand::GetEvents { respond_to } => {
                            let _ = respond_to.send(self.engine.events());
                        }

                        AlertCommand::GetStatus { respond_to } => {
                            let status = AlertStatus {
                                rules: self.engine.rules().len(),
                                skipped_rules: self.engine.skipped_rules().len(),
                                open: self.engine.open_count(),
                                muted: self.is_muted(Utc::now()),
                            };
                            let _ = respond_to.send(status);
                        }

                        AlertCommand::EvaluateNow { respond_to } => {
                            let transitions = self.evaluate().await;
                            let _ = respond_to.send(transitions);
                        }

                        AlertCommand::MuteAlerts { duration_secs } => {
                            debug!("muting alerts for {duration_secs:?}s");
                            let until = duration_secs
                                .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
                            self.muted = Some(until);
                        }

                        AlertCommand::UnmuteAlerts => {
                            debug!("unmuting alerts");
                            self.muted = None;
                        }

                        AlertCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("alert actor stopped");
    }

    async fn evaluate(&mut self) -> Vec<AlertTransition> {
        let now = Utc::now();
        let transitions = self
            .engine
            .evaluate_at(now, &self.tracker, &self.store)
            .await;
        self.publish(&transitions, now);
        transitions
    }

    fn publish(&mut self, transitions: &[AlertTransition], now: DateTime<Utc>) {
        if transitions.is_empty() {
            return;
        }

        for transition in transitions {
            let _ = self.alert_tx.send(transition.clone());
        }

        if self.is_muted(now) {
            debug!("alerts muted, {} notifications suppressed", transitions.len());
            return;
        }

        let Some(notifier) = self.notifier.clone() else {
            return;
        };

        let transitions = transitions.to_vec();
        tokio::spawn(async move {
            for transition in transitions {
                if let Err(e) = notifier.notify(&transition).await {
                    warn!("notification for {} failed: {e}", transition.event().rule_id);
                }
            }
        });
    }
}

#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
    alert_tx: broadcast::Sender<AlertTransition>,
}

impl AlertHandle {
    pub fn spawn(
        engine: AlertEngine,
        tracker: Arc<NodeTracker>,
        store: Arc<TimeSeriesStore>,
        notifier: Option<Arc<dyn Notifier>>,
        interval_duration: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (alert_tx, _) = broadcast::channel(256);
        let node_rx = tracker.subscribe();

        let actor = AlertActor::new(
            engine,
            tracker,
            store,
            notifier,
            cmd_rx,
            node_rx,
            alert_tx.clone(),
            interval_duration,
        );
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            alert_tx,
        }
    }

    /// Stream of alert transitions
    pub fn subscribe(&self) -> broadcast::Receiver<AlertTransition> {
        self.alert_tx.subscribe()
    }

    pub async fn events(&self) -> Result<Vec<AlertEvent>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::GetEvents { respond_to: tx })
            .await
            .context("failed to send GetEvents command")?;
        rx.await.context("failed to receive alert events")
    }

    pub async fn status(&self) -> Result<AlertStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;
        rx.await.context("failed to receive alert status")
    }

    pub async fn evaluate_now(&self) -> Result<Vec<AlertTransition>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::EvaluateNow { respond_to: tx })
            .await
            .context("failed to send EvaluateNow command")?;
        rx.await.context("failed to receive evaluation result")
    }

    pub async fn mute_alerts(&self, duration_secs: Option<u64>) {
        let _ = self
            .sender
            .send(AlertCommand::MuteAlerts { duration_secs })
            .await;
    }

    pub async fn unmute_alerts(&self) {
        let _ = self.sender.send(AlertCommand::UnmuteAlerts).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
