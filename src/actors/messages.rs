//! Message types for actor communication
//!
//! 1. **Commands**: request/response messages sent to one actor via mpsc, with
//!    a oneshot channel for the reply
//! 2. **Events**: broadcast notifications ([`NodeEvent`](crate::tracker::NodeEvent),
//!    [`AlertTransition`](crate::alerts::AlertTransition), accepted samples)

use serde::Serialize;
use tokio::sync::oneshot;

use crate::aggregate::{ClusterAggregate, RealtimeSnapshot};
use crate::alerts::{AlertEvent, AlertTransition};
use crate::tracker::SweepReport;

/// Commands that can be sent to the LivenessActor
#[derive(Debug)]
pub enum LivenessCommand {
    /// Run a sweep immediately, bypassing the interval timer
    SweepNow {
        respond_to: oneshot::Sender<SweepReport>,
    },

    Shutdown,
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Open events followed by recently resolved ones
    GetEvents {
        respond_to: oneshot::Sender<Vec<AlertEvent>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<AlertStatus>,
    },

    /// Evaluate all rules immediately
    EvaluateNow {
        respond_to: oneshot::Sender<Vec<AlertTransition>>,
    },

    /// Suppress notifications. Evaluation continues while muted.
    ///
    /// Without a duration alerts stay muted until unmuted.
    MuteAlerts { duration_secs: Option<u64> },

    UnmuteAlerts,

    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStatus {
    pub rules: usize,
    pub skipped_rules: usize,
    pub open: usize,
    pub muted: bool,
}

/// Commands that can be sent to the AggregatorActor
#[derive(Debug)]
pub enum AggregatorCommand {
    GetSnapshot {
        respond_to: oneshot::Sender<RealtimeSnapshot>,
    },

    /// Compute the aggregates immediately
    AggregateNow {
        respond_to: oneshot::Sender<Vec<ClusterAggregate>>,
    },

    Shutdown,
}
