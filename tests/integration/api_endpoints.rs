//! Integration tests for the server's HTTP endpoints

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::helpers::*;

#[tokio::test]
async fn test_health_requires_token() {
    let server = spawn_server(quiet_config(), Some(TEST_TOKEN)).await;

    let response = server.get("/api/v1/health").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "server");

    let missing = server
        .http
        .get(server.url("/api/v1/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = server
        .http
        .get(server.url("/api/v1/health"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sample_is_recorded_and_node_joins() {
    let server = spawn_server(quiet_config(), None).await;
    let timestamp = Utc::now();

    let response = server
        .post("/api/v1/samples")
        .json(&json!({
            "client_id": "node-1",
            "metric": "cpu",
            "timestamp": timestamp,
            "value": 42.5
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["metric"], "cpu");

    let clients = server.get_json("/api/v1/clients").await;
    let clients = clients.as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["client_id"], "node-1");
    assert_eq!(clients[0]["status"], "online");

    let series = server.get_json("/api/v1/clients/node-1/series/cpu").await;
    assert_eq!(series["capacity"], 120);
    assert_eq!(series["samples"].as_array().unwrap().len(), 1);
    assert_eq!(series["samples"][0]["value"], 42.5);
}

#[tokio::test]
async fn test_invalid_samples_are_rejected() {
    let server = spawn_server(quiet_config(), None).await;

    let cases = [
        json!({ "client_id": "node-1", "metric": "cpu", "value": 120.0 }),
        json!({ "client_id": "node-1", "metric": "network", "value": -1.0 }),
        json!({ "client_id": "node-1", "metric": "gpu", "value": 10.0 }),
        json!({ "client_id": "", "metric": "cpu", "value": 10.0 }),
    ];

    for case in cases {
        let response = server.post("/api/v1/samples").json(&case).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{case}");
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    // nothing was recorded, not even the node
    let clients = server.get_json("/api/v1/clients").await;
    assert!(clients.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_sample_is_rejected() {
    let server = spawn_server(quiet_config(), None).await;
    let timestamp = Utc::now();

    for (value, expected) in [(10.0, StatusCode::ACCEPTED), (20.0, StatusCode::UNPROCESSABLE_ENTITY)] {
        let response = server
            .post("/api/v1/samples")
            .json(&json!({
                "client_id": "node-1",
                "metric": "memory",
                "timestamp": timestamp,
                "value": value
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }

    let series = server.get_json("/api/v1/clients/node-1/series/memory").await;
    assert_eq!(series["samples"].as_array().unwrap().len(), 1);
    assert_eq!(series["samples"][0]["value"], 10.0);
}

#[tokio::test]
async fn test_report_accepts_metrics_independently() {
    let server = spawn_server(quiet_config(), None).await;

    let response = server
        .post("/api/v1/reports")
        .json(&json!({
            "client_id": "node-1",
            "metrics": { "cpu": 30.0, "memory": 140.0, "load": 1.5 }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], json!(["cpu", "load"]));
    assert_eq!(body["rejected"].as_array().unwrap().len(), 1);
    assert_eq!(body["rejected"][0]["metric"], "memory");

    let rejected = server
        .post("/api/v1/reports")
        .json(&json!({ "client_id": "node-2", "metrics": { "disk": -3.0 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let empty = server
        .post("/api/v1/reports")
        .json(&json!({ "client_id": "node-2", "metrics": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let clients = server.get_json("/api/v1/clients").await;
    assert_eq!(clients.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_client_lookup_errors() {
    let server = spawn_server(quiet_config(), None).await;

    let missing = server.get("/api/v1/clients/ghost").send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let missing_series = server.get("/api/v1/clients/ghost/series/cpu").send().await.unwrap();
    assert_eq!(missing_series.status(), StatusCode::NOT_FOUND);

    let bad_metric = server.get("/api/v1/clients/ghost/series/gpu").send().await.unwrap();
    assert_eq!(bad_metric.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_and_remove_client() {
    let server = spawn_server(quiet_config(), None).await;

    let response = server
        .post("/api/v1/clients/register")
        .json(&json!({ "client_id": "node-7", "address": "10.0.0.7" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let node: Value = response.json().await.unwrap();
    assert_eq!(node["address"], "10.0.0.7");
    assert_eq!(node["status"], "online");

    server
        .monitor
        .ingestor
        .submit("node-7", overwatch::MetricType::Disk, Utc::now(), 55.0)
        .await
        .unwrap();

    let removed = server.delete("/api/v1/clients/node-7").send().await.unwrap();
    assert_eq!(removed.status(), StatusCode::OK);

    let gone = server.get("/api/v1/clients/node-7").send().await.unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    assert!(
        server
            .monitor
            .store
            .snapshot("node-7", overwatch::MetricType::Disk)
            .await
            .is_empty()
    );

    let again = server.delete("/api/v1/clients/node-7").send().await.unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_alert_opens_and_mute_is_reported() {
    let server = spawn_server(quiet_config(), None).await;

    let response = server
        .post("/api/v1/samples")
        .json(&json!({ "client_id": "node-1", "metric": "cpu", "value": 97.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let transitions = server.monitor.alerts.evaluate_now().await.unwrap();
    assert_eq!(transitions.len(), 1);

    let alerts = server.get_json("/api/v1/alerts").await;
    assert_eq!(alerts["open"], 1);
    assert_eq!(alerts["muted"], false);
    assert_eq!(alerts["alerts"][0]["rule_id"], "cpu-hot");
    assert_eq!(alerts["alerts"][0]["client_id"], "node-1");
    assert_eq!(alerts["alerts"][0]["severity"], "critical");

    let mute = server.post("/api/v1/alerts/mute").send().await.unwrap();
    assert_eq!(mute.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.get_json("/api/v1/alerts").await["muted"], true);

    let unmute = server.delete("/api/v1/alerts/mute").send().await.unwrap();
    assert_eq!(unmute.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.get_json("/api/v1/alerts").await["muted"], false);
}

#[tokio::test]
async fn test_realtime_reports_cluster_means() {
    let server = spawn_server(quiet_config(), None).await;
    let timestamp = Utc::now() - Duration::seconds(1);

    for (client_id, value) in [("node-a", 50.0), ("node-b", 70.0)] {
        server
            .monitor
            .ingestor
            .submit(client_id, overwatch::MetricType::Cpu, timestamp, value)
            .await
            .unwrap();
    }
    server.monitor.aggregator.aggregate_now().await.unwrap();

    let realtime = server.get_json("/api/v1/realtime").await;
    assert_eq!(realtime["cluster"]["cpu"], 60.0);
    assert_eq!(realtime["cluster"]["memory"], Value::Null);
    assert_eq!(realtime["time_series"]["cpu"].as_array().unwrap().len(), 1);
    assert!(realtime["updated_at"].is_string());
}

#[tokio::test]
async fn test_stats_counts_clients() {
    let server = spawn_server(quiet_config(), None).await;

    server
        .monitor
        .ingestor
        .submit("node-1", overwatch::MetricType::Load, Utc::now(), 0.5)
        .await
        .unwrap();

    let stats = server.get_json("/api/v1/stats").await;
    assert_eq!(stats["clients"]["online"], 1);
    assert_eq!(stats["clients"]["offline"], 0);
    assert_eq!(stats["alerts"]["rules"], 1);
}
