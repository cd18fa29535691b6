//! AggregatorActor - Periodic cluster aggregates
//!
//! Owns the [`Aggregator`] and its chart history. Readers get a cloned
//! [`RealtimeSnapshot`] through the handle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument};

use crate::aggregate::{Aggregator, ClusterAggregate, RealtimeSnapshot};
use crate::storage::TimeSeriesStore;
use crate::tracker::NodeTracker;

use super::messages::AggregatorCommand;

pub struct AggregatorActor {
    aggregator: Aggregator,
    tracker: Arc<NodeTracker>,
    store: Arc<TimeSeriesStore>,
    command_rx: mpsc::Receiver<AggregatorCommand>,
    interval_duration: Duration,
}

impl AggregatorActor {
    pub fn new(
        aggregator: Aggregator,
        tracker: Arc<NodeTracker>,
        store: Arc<TimeSeriesStore>,
        command_rx: mpsc::Receiver<AggregatorCommand>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            aggregator,
            tracker,
            store,
            command_rx,
            interval_duration,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting aggregator actor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.aggregate().await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        AggregatorCommand::GetSnapshot { respond_to } => {
                            let _ = respond_to.send(self.aggregator.snapshot());
                        }

                        AggregatorCommand::AggregateNow { respond_to } => {
                            let aggregates = self.aggregate().await;
                            let _ = respond_to.send(aggregates);
                        }

                        AggregatorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("aggregator actor stopped");
    }

    async fn aggregate(&mut self) -> Vec<ClusterAggregate> {
        self.aggregator
            .compute_at(Utc::now(), &self.tracker, &self.store)
            .await
    }
}

#[derive(Clone)]
pub struct AggregatorHandle {
    sender: mpsc::Sender<AggregatorCommand>,
}

impl AggregatorHandle {
    pub fn spawn(
        aggregator: Aggregator,
        tracker: Arc<NodeTracker>,
        store: Arc<TimeSeriesStore>,
        interval_duration: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = AggregatorActor::new(aggregator, tracker, store, cmd_rx, interval_duration);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    pub async fn snapshot(&self) -> Result<RealtimeSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::GetSnapshot { respond_to: tx })
            .await
            .context("failed to send GetSnapshot command")?;
        rx.await.context("failed to receive snapshot")
    }

    pub async fn aggregate_now(&self) -> Result<Vec<ClusterAggregate>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::AggregateNow { respond_to: tx })
            .await
            .context("failed to send AggregateNow command")?;
        rx.await.context("failed to receive aggregates")
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AggregatorCommand::Shutdown).await;
    }
}
