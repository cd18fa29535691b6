//! Concurrent ingestion against a running server
//!
//! - Many agents pushing at once each end up as exactly one node
//! - Concurrent reports of one agent never corrupt its series order
//! - Removing a node while it is still pushing leaves no orphaned series

use std::collections::HashSet;

use chrono::{Duration, Utc};
use overwatch::MetricType;
use reqwest::StatusCode;
use serde_json::json;

use crate::helpers::*;

#[tokio::test]
async fn test_many_agents_push_concurrently() {
    let server = spawn_server(quiet_config(), None).await;

    let mut tasks = vec![];
    for i in 0..40 {
        let http = server.http.clone();
        let url = server.url("/api/v1/reports");
        tasks.push(tokio::spawn(async move {
            http.post(url)
                .json(&json!({
                    "client_id": format!("node-{i}"),
                    "metrics": { "cpu": 10.0 + i as f64, "memory": 50.0 }
                }))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::ACCEPTED);
    }

    let clients = server.get_json("/api/v1/clients").await;
    let ids: HashSet<String> = clients
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["client_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 40);

    let stats = server.get_json("/api/v1/stats").await;
    assert_eq!(stats["clients"]["online"], 40);
    assert_eq!(stats["storage"]["samples"], 80);
}

#[tokio::test]
async fn test_concurrent_samples_of_one_series_stay_ordered() {
    let server = spawn_server(quiet_config(), None).await;
    let base = Utc::now() - Duration::seconds(120);

    let mut tasks = vec![];
    for i in 0..50 {
        let ingestor = server.monitor.ingestor.clone();
        let timestamp = base + Duration::seconds(i);
        tasks.push(tokio::spawn(async move {
            ingestor
                .submit("node-1", MetricType::Cpu, timestamp, i as f64)
                .await
                .is_ok()
        }));
    }

    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap() {
            accepted += 1;
        }
    }

    // out of order arrivals are rejected as stale, the rest is kept in order
    let samples = server.monitor.store.snapshot("node-1", MetricType::Cpu).await;
    assert_eq!(samples.len(), accepted.min(120));
    assert!(accepted >= 1);
    assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn test_remove_while_pushing_leaves_no_orphans() {
    let server = spawn_server(quiet_config(), None).await;
    let base = Utc::now() - Duration::seconds(60);

    for i in 0..5 {
        server
            .monitor
            .ingestor
            .submit("node-1", MetricType::Disk, base + Duration::seconds(i), 40.0)
            .await
            .unwrap();
    }

    let ingestor = server.monitor.ingestor.clone();
    let pusher = tokio::spawn(async move {
        for i in 5..30 {
            let _ = ingestor
                .submit("node-1", MetricType::Disk, base + Duration::seconds(i), 40.0)
                .await;
            tokio::task::yield_now().await;
        }
    });

    let tracker = server.monitor.tracker.clone();
    let remover = tokio::spawn(async move {
        tokio::task::yield_now().await;
        tracker.remove_client("node-1", Utc::now()).await
    });

    pusher.await.unwrap();
    remover.await.unwrap();

    // either the node came back with its new samples or it is gone together
    // with its series
    let node = server.monitor.tracker.get("node-1").await;
    let samples = server.monitor.store.snapshot("node-1", MetricType::Disk).await;
    match node {
        Some(_) => assert!(!samples.is_empty()),
        None => assert!(samples.is_empty()),
    }
}
