//! Live stream over the WebSocket endpoint

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use overwatch::MetricType;
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::helpers::*;

/// Messages read so far, so that waiting for one type does not drop the others
struct Received<S> {
    stream: S,
    seen: Vec<Value>,
}

impl<S> Received<S>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    async fn next_of_type(&mut self, kind: &str) -> Value {
        if let Some(i) = self.seen.iter().position(|v| v["type"] == kind) {
            return self.seen.remove(i);
        }

        timeout(Duration::from_secs(5), async {
            loop {
                let message = self.stream.next().await.unwrap().unwrap();
                if let Message::Text(text) = message {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                    self.seen.push(value);
                }
            }
        })
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_stream_forwards_samples_nodes_and_alerts() {
    let server = spawn_server(quiet_config(), None).await;

    let (stream, _) = connect_async(format!("ws://{}/api/v1/stream", server.addr))
        .await
        .unwrap();
    // let the handler subscribe before anything is published
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut received = Received {
        stream,
        seen: Vec::new(),
    };

    server
        .monitor
        .ingestor
        .submit("node-1", MetricType::Cpu, Utc::now(), 99.0)
        .await
        .unwrap();

    let node = received.next_of_type("node").await;
    assert_eq!(node["event"], "joined");
    assert_eq!(node["client_id"], "node-1");

    let sample = received.next_of_type("sample").await;
    assert_eq!(sample["metric"], "cpu");
    assert_eq!(sample["value"], 99.0);

    server.monitor.alerts.evaluate_now().await.unwrap();

    let alert = received.next_of_type("alert").await;
    assert_eq!(alert["event"], "opened");
    assert_eq!(alert["alert"]["rule_id"], "cpu-hot");
}

#[tokio::test]
async fn test_stream_requires_token() {
    let server = spawn_server(quiet_config(), Some(TEST_TOKEN)).await;

    let result = connect_async(format!("ws://{}/api/v1/stream", server.addr)).await;
    assert!(result.is_err());

    let result = connect_async(format!(
        "ws://{}/api/v1/stream?token={TEST_TOKEN}",
        server.addr
    ))
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_stream_accepts_percent_encoded_token() {
    let server = spawn_server(quiet_config(), Some("a+b/c=")).await;

    let result = connect_async(format!(
        "ws://{}/api/v1/stream?token=a%2Bb%2Fc%3D",
        server.addr
    ))
    .await;
    assert!(result.is_ok());
}
