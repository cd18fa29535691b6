//! Shared setup for the integration tests

use std::net::SocketAddr;
use std::sync::Arc;

use overwatch::{
    actors::Monitor,
    alerts::Severity,
    api::{ApiConfig, ApiState, RegistryState, spawn_api_server, spawn_registry_server},
    config::{AlertRuleConfig, Config},
    registry::Registry,
};
use serde_json::Value;

pub const TEST_TOKEN: &str = "test-token";

/// Config whose actors never tick on their own during a test
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.tracker.sweep_interval_secs = 3600;
    config.alerts.evaluation_interval_secs = 3600;
    config.aggregator.interval_secs = 3600;
    config.alerts.rules = vec![AlertRuleConfig {
        id: "cpu-hot".to_string(),
        metric: "cpu".to_string(),
        comparator: ">".to_string(),
        threshold: 90.0,
        sustain_secs: 0,
        severity: Severity::Critical,
    }];
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub monitor: Monitor,
    pub http: reqwest::Client,
    token: Option<String>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorized(self.http.get(self.url(path)))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorized(self.http.post(self.url(path)))
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorized(self.http.delete(self.url(path)))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).send().await.unwrap();
        assert!(response.status().is_success(), "GET {path}: {}", response.status());
        response.json().await.unwrap()
    }
}

pub async fn spawn_server(config: Config, auth_token: Option<&str>) -> TestServer {
    let monitor = Monitor::spawn_with_notifier(&config, None);
    let api_config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: auth_token.map(str::to_string),
        enable_cors: true,
    };

    let addr = spawn_api_server(api_config, ApiState::new(&monitor))
        .await
        .unwrap();

    TestServer {
        addr,
        monitor,
        http: reqwest::Client::new(),
        token: auth_token.map(str::to_string),
    }
}

pub async fn spawn_registry(default_ttl_secs: u64) -> (SocketAddr, Arc<Registry>) {
    let registry = Arc::new(Registry::new());
    let state = RegistryState::new(registry.clone(), default_ttl_secs);
    let addr = spawn_registry_server("127.0.0.1:0".parse().unwrap(), state)
        .await
        .unwrap();
    (addr, registry)
}
