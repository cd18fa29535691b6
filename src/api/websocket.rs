//! WebSocket handler for live streaming
//!
//! Every message is a JSON object tagged by `type`:
//!
//! - `sample`: an accepted sample
//! - `node`: a liveness change (`joined`, `online`, `offline`, `evicted`)
//! - `alert`: an alert transition (`opened`, `resolved`)

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::MetricSample;
use crate::alerts::AlertTransition;
use crate::api::state::ApiState;
use crate::tracker::NodeEvent;

/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

pub fn sample_message(sample: &MetricSample) -> Value {
    json!({
        "type": "sample",
        "client_id": sample.client_id,
        "metric": sample.metric_type,
        "timestamp": sample.timestamp.to_rfc3339(),
        "value": sample.value,
    })
}

pub fn node_message(event: &NodeEvent) -> Value {
    json!({
        "type": "node",
        "event": event.kind(),
        "client_id": event.client_id(),
        "at": event.at().to_rfc3339(),
    })
}

pub fn alert_message(transition: &AlertTransition) -> Value {
    json!({
        "type": "alert",
        "event": transition.kind(),
        "alert": transition.event(),
    })
}

/// Turn a broadcast result into a message, skipping over lag.
///
/// `None` means the channel is closed.
fn next_message<T>(result: Result<T, RecvError>, render: impl Fn(&T) -> Value) -> Option<Option<Value>> {
    match result {
        Ok(item) => Some(Some(render(&item))),
        Err(RecvError::Lagged(skipped)) => {
            warn!("websocket subscriber lagged, skipped {skipped} messages");
            Some(None)
        }
        Err(RecvError::Closed) => None,
    }
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    let mut sample_rx: broadcast::Receiver<MetricSample> = state.ingestor.subscribe();
    let mut node_rx = state.tracker.subscribe();
    let mut alert_rx = state.alerts.subscribe();

    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                result = sample_rx.recv() => next_message(result, sample_message),
                result = node_rx.recv() => next_message(result, node_message),
                result = alert_rx.recv() => next_message(result, alert_message),
            };

            let Some(message) = message else {
                debug!("broadcast channel closed");
                break;
            };
            let Some(message) = message else {
                continue;
            };

            if sender.send(Message::Text(message.to_string())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}
