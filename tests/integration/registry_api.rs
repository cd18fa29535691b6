//! Integration tests for the registry service and its clients

use std::time::Duration;

use assert_matches::assert_matches;
use overwatch::client::{Announcer, ClientError, RegistryClient};
use overwatch::registry::ServiceRole;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::helpers::*;

#[tokio::test]
async fn test_register_lookup_deregister() {
    let (addr, registry) = spawn_registry(30).await;
    let client = RegistryClient::new(&addr.to_string());

    let server = client
        .register("srv-1", "10.0.0.1:10641", ServiceRole::Server, None)
        .await
        .unwrap();
    assert_eq!(server.ttl_secs, 30);
    client
        .register("agent-1", "10.0.0.2", ServiceRole::Client, Some(10))
        .await
        .unwrap();

    assert_eq!(
        client.lookup(ServiceRole::Server).await.unwrap(),
        vec!["10.0.0.1:10641".to_string()]
    );
    assert_eq!(
        client.lookup(ServiceRole::Client).await.unwrap(),
        vec!["10.0.0.2".to_string()]
    );
    assert_eq!(registry.len(), 2);

    client.deregister(&server.token).await.unwrap();
    assert!(client.lookup(ServiceRole::Server).await.unwrap().is_empty());

    // deregistering twice is fine
    client.deregister(&server.token).await.unwrap();
}

#[tokio::test]
async fn test_reregistration_replaces_previous_entry() {
    let (addr, _registry) = spawn_registry(30).await;
    let client = RegistryClient::new(&addr.to_string());

    let first = client
        .register("srv-1", "10.0.0.1:10641", ServiceRole::Server, None)
        .await
        .unwrap();
    let second = client
        .register("srv-1", "10.0.0.9:10641", ServiceRole::Server, None)
        .await
        .unwrap();
    assert_ne!(first.token, second.token);

    assert_eq!(
        client.lookup(ServiceRole::Server).await.unwrap(),
        vec!["10.0.0.9:10641".to_string()]
    );
    assert_matches!(client.renew(&first.token).await, Err(ClientError::Expired));
    client.renew(&second.token).await.unwrap();
}

#[tokio::test]
async fn test_unknown_token_is_gone() {
    let (addr, _registry) = spawn_registry(30).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/registry/renew"))
        .json(&json!({ "token": "not-a-token" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_invalid_registrations() {
    let (addr, _registry) = spawn_registry(30).await;
    let http = reqwest::Client::new();

    let zero_ttl = http
        .post(format!("http://{addr}/registry/register"))
        .json(&json!({ "service_id": "srv", "address": "a:1", "role": "server", "ttl_secs": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(zero_ttl.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let empty_address = http
        .post(format!("http://{addr}/registry/register"))
        .json(&json!({ "service_id": "srv", "address": " ", "role": "server" }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty_address.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bad_role = http
        .get(format!("http://{addr}/registry/lookup?role=viewer"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_role.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lapsed_registration_is_hidden_until_renewed() {
    let (addr, _registry) = spawn_registry(30).await;
    let client = RegistryClient::new(&addr.to_string());

    let registration = client
        .register("agent-1", "10.0.0.2", ServiceRole::Client, Some(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(client.lookup(ServiceRole::Client).await.unwrap().is_empty());

    // still inside the renewal grace window
    client.renew(&registration.token).await.unwrap();
    assert_eq!(
        client.lookup(ServiceRole::Client).await.unwrap(),
        vec!["10.0.0.2".to_string()]
    );
}

#[tokio::test]
async fn test_announcer_survives_registry_restart() {
    let (addr, registry) = spawn_registry(30).await;
    let mut announcer = Announcer::new(
        RegistryClient::new(&addr.to_string()),
        "srv-1",
        "10.0.0.1:10641",
        ServiceRole::Server,
        10,
    );

    announcer.ensure_registered().await.unwrap();
    assert_eq!(registry.len(), 1);

    // the registry forgot every registration
    let tokens: Vec<String> = registry
        .entries(ServiceRole::Server)
        .into_iter()
        .map(|entry| entry.token)
        .collect();
    for token in tokens {
        registry.deregister(&token);
    }
    assert!(registry.is_empty());

    announcer.renew().await.unwrap();
    assert_eq!(
        announcer.registry().lookup(ServiceRole::Server).await.unwrap(),
        vec!["10.0.0.1:10641".to_string()]
    );

    announcer.deregister().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_announced_server_leaves_lookup_on_deregister() {
    let (addr, _registry) = spawn_registry(30).await;
    let mut announcer = Announcer::new(
        RegistryClient::new(&addr.to_string()),
        "server-10.0.0.2:10641",
        "10.0.0.2:10641",
        ServiceRole::Server,
        30,
    );
    announcer.ensure_registered().await.unwrap();

    let lookup = RegistryClient::new(&addr.to_string());
    assert_eq!(lookup.lookup(ServiceRole::Server).await.unwrap().len(), 1);

    announcer.deregister().await;
    assert!(!announcer.is_registered());
    assert!(lookup.lookup(ServiceRole::Server).await.unwrap().is_empty());

    // nothing left to deregister
    announcer.deregister().await;
}
