//! Delivery of alert transitions to external receivers
//!
//! Notifier failures are reported to the caller for logging only. They never
//! change the state of the alert engine.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use crate::alerts::AlertTransition;
use crate::config::Webhook;

#[derive(Debug)]
pub enum NotifyError {
    /// The request could not be sent
    Transport(String),

    /// The receiver answered with a non-success status
    Status(u16),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Transport(msg) => write!(f, "failed to deliver notification: {msg}"),
            NotifyError::Status(status) => write!(f, "notification rejected with status {status}"),
        }
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, transition: &AlertTransition) -> Result<(), NotifyError>;
}

/// Human readable summary of a transition
pub fn describe(transition: &AlertTransition) -> String {
    let event = transition.event();
    match transition {
        AlertTransition::Opened(_) => format!(
            "[{}] {} on {}: {} {} {} (value {:.1})",
            event.severity,
            event.rule_id,
            event.client_id,
            event.metric,
            event.comparator.symbol(),
            event.threshold,
            event.value
        ),
        AlertTransition::Resolved(_) => {
            let reason = match event.resolution {
                Some(crate::alerts::Resolution::NodeLost) => "node lost",
                _ => "recovered",
            };
            format!("{} on {} resolved ({reason})", event.rule_id, event.client_id)
        }
    }
}

/// POSTs a JSON document per transition to a configured URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(webhook: &Webhook) -> Self {
        Self {
            client: Client::new(),
            url: webhook.url.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, transition), fields(url = %self.url))]
    async fn notify(&self, transition: &AlertTransition) -> Result<(), NotifyError> {
        let payload = json!({
            "kind": transition.kind(),
            "message": describe(transition),
            "event": transition.event(),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        debug!("sent {} notification", transition.kind());
        Ok(())
    }
}
