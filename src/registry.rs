//! Service discovery directory
//!
//! Servers and clients register their address under a role and keep the entry
//! alive by renewing it within its ttl. Nothing expires entries in the
//! background: lapsed entries are hidden from lookups, and purged once they are
//! past the renew grace window when a lookup or renew comes across them.
//!
//! ```text
//!   register ──▶ live ──silent > ttl──▶ lapsed ──silent > 2×ttl──▶ purged
//!                 ▲                       │
//!                 └────────renew──────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::RegistryError;

/// Multiple of the ttl during which a lapsed entry can still be renewed
const RENEW_GRACE_FACTOR: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Server,
    Client,
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRole::Server => write!(f, "server"),
            ServiceRole::Client => write!(f, "client"),
        }
    }
}

impl FromStr for ServiceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(ServiceRole::Server),
            "client" => Ok(ServiceRole::Client),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Only ever handed to the registering service
    #[serde(skip_serializing, default)]
    pub token: String,
    pub service_id: String,
    pub address: String,
    pub role: ServiceRole,
    pub ttl_secs: u64,
    pub registered_at: DateTime<Utc>,
    pub last_renewed_at: DateTime<Utc>,
}

impl RegistryEntry {
    fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs as i64)
    }

    /// Visible to lookups
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now - self.last_renewed_at <= self.ttl()
    }

    /// Still renewable
    fn is_renewable(&self, now: DateTime<Utc>) -> bool {
        now - self.last_renewed_at <= self.ttl() * RENEW_GRACE_FACTOR
    }
}

#[derive(Default)]
pub struct Registry {
    /// Entries by token
    entries: DashMap<String, RegistryEntry>,
    /// Current token of each service
    services: DashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        service_id: &str,
        address: &str,
        role: ServiceRole,
        ttl_secs: u64,
    ) -> Result<String, RegistryError> {
        self.register_at(service_id, address, role, ttl_secs, Utc::now())
    }

    /// Register a service, replacing any previous registration of the same id.
    pub fn register_at(
        &self,
        service_id: &str,
        address: &str,
        role: ServiceRole,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<String, RegistryError> {
        if ttl_secs == 0 {
            return Err(RegistryError::InvalidTtl);
        }

        let token = Uuid::new_v4().to_string();
        let entry = RegistryEntry {
            token: token.clone(),
            service_id: service_id.to_string(),
            address: address.to_string(),
            role,
            ttl_secs,
            registered_at: now,
            last_renewed_at: now,
        };

        // the service shard stays locked until the new entry is in place
        match self.services.entry(service_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(token.clone());
                self.entries.remove(&previous);
                self.entries.insert(token.clone(), entry);
                debug!("{role} {service_id} re-registered at {address}");
            }
            Entry::Vacant(vacant) => {
                self.entries.insert(token.clone(), entry);
                vacant.insert(token.clone());
                info!("{role} {service_id} registered at {address}");
            }
        }

        Ok(token)
    }

    pub fn renew(&self, token: &str) -> Result<(), RegistryError> {
        self.renew_at(token, Utc::now())
    }

    /// Extend the lease of a registration.
    ///
    /// Fails with [`RegistryError::Expired`] if the token is unknown or was
    /// silent past the grace window; the caller has to register again.
    pub fn renew_at(&self, token: &str, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let expired = {
            let mut entry = self.entries.get_mut(token).ok_or(RegistryError::Expired)?;
            if entry.is_renewable(now) {
                entry.last_renewed_at = now.max(entry.last_renewed_at);
                None
            } else {
                Some(entry.service_id.clone())
            }
        };

        match expired {
            None => Ok(()),
            Some(service_id) => {
                debug!("renewal of {service_id} came too late");
                self.purge(token, &service_id, now);
                Err(RegistryError::Expired)
            }
        }
    }

    /// Remove a registration. Unknown tokens are ignored.
    pub fn deregister(&self, token: &str) {
        if let Some((_, entry)) = self.entries.remove(token) {
            self.services.remove_if(&entry.service_id, |_, current| current == token);
            info!("{} {} deregistered", entry.role, entry.service_id);
        }
    }

    pub fn lookup(&self, role: ServiceRole) -> Vec<String> {
        self.lookup_at(role, Utc::now())
    }

    /// Addresses of all live entries of a role, most recently renewed first.
    pub fn lookup_at(&self, role: ServiceRole, now: DateTime<Utc>) -> Vec<String> {
        self.entries_at(role, now)
            .into_iter()
            .map(|entry| entry.address)
            .collect()
    }

    pub fn entries(&self, role: ServiceRole) -> Vec<RegistryEntry> {
        self.entries_at(role, Utc::now())
    }

    /// Live entries of a role, most recently renewed first.
    pub fn entries_at(&self, role: ServiceRole, now: DateTime<Utc>) -> Vec<RegistryEntry> {
        let mut live = Vec::new();
        let mut dead = Vec::new();

        for entry in self.entries.iter() {
            if entry.role != role {
                continue;
            }
            if entry.is_live(now) {
                live.push(entry.value().clone());
            } else if !entry.is_renewable(now) {
                dead.push((entry.token.clone(), entry.service_id.clone()));
            }
        }

        for (token, service_id) in dead {
            self.purge(&token, &service_id, now);
        }

        live.sort_by(|a, b| {
            b.last_renewed_at
                .cmp(&a.last_renewed_at)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        live
    }

    fn purge(&self, token: &str, service_id: &str, now: DateTime<Utc>) {
        // a renewal may have slipped in since the entry was found dead
        let removed = self.entries.remove_if(token, |_, entry| !entry.is_renewable(now));
        if removed.is_some() {
            self.services.remove_if(service_id, |_, current| current == token);
            debug!("purged lapsed registration of {service_id}");
        }
    }

    /// Number of stored entries, including lapsed ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        registry
            .register_at("srv-1", "10.0.0.1:10641", ServiceRole::Server, 30, t(0))
            .unwrap();
        registry
            .register_at("agent-1", "10.0.0.2", ServiceRole::Client, 30, t(0))
            .unwrap();

        assert_eq!(
            registry.lookup_at(ServiceRole::Server, t(10)),
            vec!["10.0.0.1:10641".to_string()]
        );
        assert_eq!(registry.lookup_at(ServiceRole::Client, t(10)).len(), 1);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let registry = Registry::new();
        assert_eq!(
            registry.register_at("srv", "addr", ServiceRole::Server, 0, t(0)),
            Err(RegistryError::InvalidTtl)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lapsed_entry_hidden_but_renewable() {
        let registry = Registry::new();
        let token = registry
            .register_at("srv", "addr", ServiceRole::Server, 30, t(0))
            .unwrap();

        assert_eq!(registry.lookup_at(ServiceRole::Server, t(30)).len(), 1);
        assert!(registry.lookup_at(ServiceRole::Server, t(31)).is_empty());

        registry.renew_at(&token, t(45)).unwrap();
        assert_eq!(registry.lookup_at(ServiceRole::Server, t(46)).len(), 1);
    }

    #[test]
    fn test_renew_after_grace_window_expires() {
        let registry = Registry::new();
        let token = registry
            .register_at("srv", "addr", ServiceRole::Server, 30, t(0))
            .unwrap();

        assert_eq!(registry.renew_at(&token, t(61)), Err(RegistryError::Expired));
        assert!(registry.is_empty());
        assert_eq!(registry.renew_at(&token, t(62)), Err(RegistryError::Expired));
    }

    #[test]
    fn test_unknown_token_expired() {
        let registry = Registry::new();
        assert_eq!(registry.renew_at("nope", t(0)), Err(RegistryError::Expired));
        registry.deregister("nope");
    }

    #[test]
    fn test_lookup_purges_dead_entries() {
        let registry = Registry::new();
        registry
            .register_at("srv", "addr", ServiceRole::Server, 10, t(0))
            .unwrap();

        // lapsed but inside the grace window: kept
        registry.lookup_at(ServiceRole::Server, t(15));
        assert_eq!(registry.len(), 1);

        registry.lookup_at(ServiceRole::Server, t(21));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregister_replaces_entry() {
        let registry = Registry::new();
        let old = registry
            .register_at("srv", "10.0.0.1", ServiceRole::Server, 30, t(0))
            .unwrap();
        let new = registry
            .register_at("srv", "10.0.0.9", ServiceRole::Server, 30, t(5))
            .unwrap();

        assert_ne!(old, new);
        assert_eq!(registry.renew_at(&old, t(6)), Err(RegistryError::Expired));
        assert_eq!(
            registry.lookup_at(ServiceRole::Server, t(6)),
            vec!["10.0.0.9".to_string()]
        );
    }

    #[test]
    fn test_deregister() {
        let registry = Registry::new();
        let token = registry
            .register_at("srv", "addr", ServiceRole::Server, 30, t(0))
            .unwrap();
        registry.deregister(&token);
        registry.deregister(&token);

        assert!(registry.lookup_at(ServiceRole::Server, t(1)).is_empty());
        assert_eq!(registry.renew_at(&token, t(1)), Err(RegistryError::Expired));
    }

    #[test]
    fn test_lookup_orders_freshest_first() {
        let registry = Registry::new();
        let a = registry
            .register_at("a", "addr-a", ServiceRole::Server, 60, t(0))
            .unwrap();
        registry
            .register_at("b", "addr-b", ServiceRole::Server, 60, t(5))
            .unwrap();
        registry.renew_at(&a, t(10)).unwrap();

        assert_eq!(
            registry.lookup_at(ServiceRole::Server, t(11)),
            vec!["addr-a".to_string(), "addr-b".to_string()]
        );
    }

    #[test]
    fn test_concurrent_registrations() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let token = registry
                            .register_at(&format!("svc-{i}-{j}"), "addr", ServiceRole::Client, 30, t(0))
                            .unwrap();
                        registry.renew_at(&token, t(1)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.lookup_at(ServiceRole::Client, t(2)).len(), 400);
    }
}
