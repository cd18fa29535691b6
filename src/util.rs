//! Environment settings of the agent
//!
//! Every setting falls back to a default when the variable is unset or cannot
//! be parsed.

use std::time::Duration;

const REGISTRY_URL: &str = "REGISTRY_URL";

const DEFAULT_REGISTRY_URL: &str = "http://127.0.0.1:10640";

pub fn get_registry_url() -> String {
    std::env::var(REGISTRY_URL).unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string())
}

const AGENT_ID: &str = "AGENT_ID";

/// Explicit agent id, else the host name
pub fn get_agent_id() -> String {
    std::env::var(AGENT_ID)
        .ok()
        .filter(|id| !id.trim().is_empty())
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| "agent".to_string())
}

const AGENT_ADDR: &str = "AGENT_ADDR";

/// Address the agent advertises in the registry
pub fn get_addr() -> Option<String> {
    std::env::var(AGENT_ADDR).ok()
}

const AGENT_INTERVAL: &str = "AGENT_INTERVAL";

const DEFAULT_INTERVAL_SECS: u64 = 5;

pub fn get_interval() -> Duration {
    let secs = std::env::var(AGENT_INTERVAL)
        .ok()
        .and_then(|res| res.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_INTERVAL_SECS);
    Duration::from_secs(secs)
}

const AGENT_TTL: &str = "AGENT_TTL";

const DEFAULT_TTL_SECS: u64 = 30;

pub fn get_ttl() -> u64 {
    std::env::var(AGENT_TTL)
        .ok()
        .and_then(|res| res.parse::<u64>().ok())
        .filter(|ttl| *ttl > 0)
        .unwrap_or(DEFAULT_TTL_SECS)
}

const AGENT_SECRET: &str = "AGENT_SECRET";

/// Bearer token for the server API
pub fn get_secret() -> Option<String> {
    std::env::var(AGENT_SECRET).ok()
}

const REGISTRY_PORT: &str = "REGISTRY_PORT";

const DEFAULT_REGISTRY_PORT: u16 = 10640;

pub fn get_registry_port() -> u16 {
    std::env::var(REGISTRY_PORT).map_or(DEFAULT_REGISTRY_PORT, |res| {
        res.parse().unwrap_or(DEFAULT_REGISTRY_PORT)
    })
}

/// Exponential backoff, doubling per attempt up to `max`
pub fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}
