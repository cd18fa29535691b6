//! HTTP clients for the registry and the monitoring server

use std::fmt;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::api::types::{
    LookupResponse, RegisterClientRequest, RegisterServiceRequest, RegisterServiceResponse,
    ReportRequest, ReportResponse, TokenRequest,
};
use crate::registry::ServiceRole;
use crate::tracker::ClientNode;

#[derive(Debug)]
pub enum ClientError {
    /// The registration is gone and has to be renewed by registering again
    Expired,

    /// The request could not be sent or the response not read
    Transport(reqwest::Error),

    /// Unexpected status, with the response body
    Status(StatusCode, String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Expired => write!(f, "registration expired"),
            ClientError::Transport(e) => write!(f, "request failed: {e}"),
            ClientError::Status(status, body) => write!(f, "unexpected status {status}: {body}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Prefix bare `host:port` addresses with `http://`.
pub fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

async fn expect_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status(status, body))
}

async fn json<T: DeserializeOwned>(request: RequestBuilder) -> ClientResult<T> {
    let response = expect_success(request.send().await?).await?;
    Ok(response.json().await?)
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(address: &str) -> Self {
        Self {
            http: http_client(),
            base_url: base_url(address),
        }
    }

    #[instrument(skip(self))]
    pub async fn register(
        &self,
        service_id: &str,
        address: &str,
        role: ServiceRole,
        ttl_secs: Option<u64>,
    ) -> ClientResult<RegisterServiceResponse> {
        let request = RegisterServiceRequest {
            service_id: service_id.to_string(),
            address: address.to_string(),
            role,
            ttl_secs,
        };
        let response: RegisterServiceResponse = json(
            self.http
                .post(format!("{}/registry/register", self.base_url))
                .json(&request),
        )
        .await?;

        debug!("registered {role} {service_id}, ttl {}s", response.ttl_secs);
        Ok(response)
    }

    /// Renew a registration. [`ClientError::Expired`] means register again.
    pub async fn renew(&self, token: &str) -> ClientResult<()> {
        let response = self
            .http
            .post(format!("{}/registry/renew", self.base_url))
            .json(&TokenRequest {
                token: token.to_string(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::GONE {
            return Err(ClientError::Expired);
        }
        expect_success(response).await?;
        Ok(())
    }

    pub async fn deregister(&self, token: &str) -> ClientResult<()> {
        let response = self
            .http
            .post(format!("{}/registry/deregister", self.base_url))
            .json(&TokenRequest {
                token: token.to_string(),
            })
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    /// Live addresses of a role, freshest first
    pub async fn lookup(&self, role: ServiceRole) -> ClientResult<Vec<String>> {
        let response: LookupResponse = json(
            self.http
                .get(format!("{}/registry/lookup", self.base_url))
                .query(&[("role", role.to_string())]),
        )
        .await?;
        Ok(response.addresses)
    }
}

#[derive(Debug, Clone)]
pub struct ServerClient {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ServerClient {
    pub fn new(address: &str, auth_token: Option<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url(address),
            auth_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.http.post(format!("{}{path}", self.base_url));
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn register_client(&self, client_id: &str, address: Option<String>) -> ClientResult<ClientNode> {
        json(self.post("/api/v1/clients/register").json(&RegisterClientRequest {
            client_id: client_id.to_string(),
            address,
        }))
        .await
    }

    /// Push a report. Rejected metrics are listed in the response, they are
    /// not an error.
    pub async fn submit_report(&self, report: &ReportRequest) -> ClientResult<ReportResponse> {
        let response = self.post("/api/v1/reports").json(report).send().await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await?;
            return serde_json::from_str(&body)
                .map_err(|_| ClientError::Status(StatusCode::UNPROCESSABLE_ENTITY, body));
        }

        let response = expect_success(response).await?;
        Ok(response.json().await?)
    }
}

/// Keeps one service registered: registers on demand, renews, and registers
/// again once the registry reports the registration as expired.
#[derive(Debug)]
pub struct Announcer {
    client: RegistryClient,
    service_id: String,
    address: String,
    role: ServiceRole,
    ttl_secs: u64,
    token: Option<String>,
}

impl Announcer {
    pub fn new(client: RegistryClient, service_id: &str, address: &str, role: ServiceRole, ttl_secs: u64) -> Self {
        Self {
            client,
            service_id: service_id.to_string(),
            address: address.to_string(),
            role,
            ttl_secs,
            token: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.token.is_some()
    }

    /// Renew at half the ttl
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs((self.ttl_secs / 2).max(1))
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.client
    }

    pub async fn ensure_registered(&mut self) -> ClientResult<()> {
        if self.token.is_some() {
            return Ok(());
        }

        let response = self
            .client
            .register(&self.service_id, &self.address, self.role, Some(self.ttl_secs))
            .await?;
        self.ttl_secs = response.ttl_secs;
        self.token = Some(response.token);
        Ok(())
    }

    /// Renew the registration, registering again if it expired.
    pub async fn renew(&mut self) -> ClientResult<()> {
        let Some(token) = self.token.clone() else {
            return self.ensure_registered().await;
        };

        match self.client.renew(&token).await {
            Err(ClientError::Expired) => {
                warn!("registration of {} expired, registering again", self.service_id);
                self.token = None;
                self.ensure_registered().await
            }
            result => result,
        }
    }

    pub async fn deregister(&mut self) {
        if let Some(token) = self.token.take()
            && let Err(e) = self.client.deregister(&token).await
        {
            warn!("failed to deregister {}: {e}", self.service_id);
        }
    }
}
