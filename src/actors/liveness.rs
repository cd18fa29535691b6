//! LivenessActor - Periodic sweep of the node tracker
//!
//! ```text
//! Timer tick → sweep → NodeEvents (offline, evicted) → [AlertActor, stream]
//!     ↑
//!     └─── Commands (SweepNow, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, instrument};

use crate::tracker::{NodeTracker, SweepReport};

use super::messages::LivenessCommand;

pub struct LivenessActor {
    tracker: Arc<NodeTracker>,
    command_rx: mpsc::Receiver<LivenessCommand>,
    interval_duration: Duration,
}

impl LivenessActor {
    pub fn new(
        tracker: Arc<NodeTracker>,
        command_rx: mpsc::Receiver<LivenessCommand>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            tracker,
            command_rx,
            interval_duration,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting liveness actor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        LivenessCommand::SweepNow { respond_to } => {
                            let report = self.sweep().await;
                            let _ = respond_to.send(report);
                        }

                        LivenessCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("liveness actor stopped");
    }

    async fn sweep(&self) -> SweepReport {
        let report = self.tracker.sweep_at(Utc::now()).await;

        for client_id in &report.went_offline {
            info!("client {client_id} went offline");
        }
        for node in &report.evicted {
            info!(
                "client {} evicted, last sample at {}",
                node.client_id,
                node.last_sample_at.to_rfc3339()
            );
        }

        report
    }
}

#[derive(Clone)]
pub struct LivenessHandle {
    sender: mpsc::Sender<LivenessCommand>,
}

impl LivenessHandle {
    pub fn spawn(tracker: Arc<NodeTracker>, interval_duration: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = LivenessActor::new(tracker, cmd_rx, interval_duration);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LivenessCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive sweep report")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LivenessCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
