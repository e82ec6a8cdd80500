//! Mission REST API client

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::SyncError;
use crate::mission::wire::{parse_mission_detail, parse_mission_list, parse_subscription};
use crate::mission::MissionDescriptor;

/// Outcome of a successful subscribe call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionGrant {
    pub token: Option<String>,
}

/// Remote mission API.
///
/// `password` and `token` are passed through as given; callers supply the cached values.
#[async_trait]
pub trait MissionApi: Send + Sync {
    /// `GET /Marti/api/missions`
    async fn list_missions(&self) -> Result<Vec<MissionDescriptor>, SyncError>;

    /// `GET /Marti/api/missions/{name}`
    async fn mission_detail(
        &self,
        name: &str,
        password: Option<&str>,
        token: Option<&str>,
    ) -> Result<MissionDescriptor, SyncError>;

    /// `PUT /Marti/api/missions/{name}/subscription`
    async fn subscribe(
        &self,
        name: &str,
        password: Option<&str>,
        client_uid: &str,
    ) -> Result<SubscriptionGrant, SyncError>;

    /// `DELETE /Marti/api/missions/{name}/subscription`
    async fn unsubscribe(
        &self,
        name: &str,
        client_uid: &str,
        token: Option<&str>,
    ) -> Result<(), SyncError>;

    /// `GET /Marti/api/cot/xml/{uid}`: raw CoT XML for one uid
    async fn fetch_cot(&self, uid: &str, token: Option<&str>) -> Result<Vec<u8>, SyncError>;
}

/// Retry for transport failures and 5xx responses
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(server.max_retries, server.retry_delay())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or retries run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retrying mission request"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

fn map_http_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::ServerUnreachable(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        SyncError::ServerUnreachable(format!("Connection error: {}", error))
    } else {
        SyncError::InvalidResponse(format!("HTTP error: {}", error))
    }
}

/// reqwest-backed [`MissionApi`]
pub struct HttpMissionClient {
    client: Client,
    base_url: Url,
}

impl HttpMissionClient {
    pub fn new(server: &ServerConfig) -> Result<Self, SyncError> {
        let base = server
            .base_url()
            .ok_or_else(|| SyncError::ConfigError("server.host is not set".to_string()))?;
        let base_url = Url::parse(&base)
            .map_err(|e| SyncError::ConfigError(format!("Invalid server URL {}: {}", base, e)))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(server.connect_timeout_secs))
            .timeout(Duration::from_secs(server.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::ConfigError(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, token: Option<&str>) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and return the body of a successful response.
    ///
    /// 401/403 on a mission-scoped call map to a bad-password error for that mission.
    async fn send(
        &self,
        builder: RequestBuilder,
        mission: Option<&str>,
    ) -> Result<Vec<u8>, SyncError> {
        let response = builder.send().await.map_err(map_http_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match (status.as_u16(), mission) {
                (401 | 403, Some(name)) => SyncError::BadMissionPassword(name.to_string()),
                _ => SyncError::RemoteStatus {
                    status: status.as_u16(),
                    message,
                },
            });
        }
        let body = response.bytes().await.map_err(map_http_error)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl MissionApi for HttpMissionClient {
    async fn list_missions(&self) -> Result<Vec<MissionDescriptor>, SyncError> {
        let url = self.url(&["Marti", "api", "missions"])?;
        let body = self.send(self.request(Method::GET, url, None), None).await?;
        let missions = parse_mission_list(&body)?;
        debug!(count = missions.len(), "Listed missions");
        Ok(missions)
    }

    async fn mission_detail(
        &self,
        name: &str,
        password: Option<&str>,
        token: Option<&str>,
    ) -> Result<MissionDescriptor, SyncError> {
        let mut url = self.url(&["Marti", "api", "missions", name])?;
        if let Some(password) = password {
            url.query_pairs_mut().append_pair("password", password);
        }
        let body = self
            .send(self.request(Method::GET, url, token), Some(name))
            .await?;
        parse_mission_detail(&body, name)
    }

    async fn subscribe(
        &self,
        name: &str,
        password: Option<&str>,
        client_uid: &str,
    ) -> Result<SubscriptionGrant, SyncError> {
        let mut url = self.url(&["Marti", "api", "missions", name, "subscription"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("uid", client_uid);
            if let Some(password) = password {
                query.append_pair("password", password);
            }
        }
        let body = self
            .send(self.request(Method::PUT, url, None), Some(name))
            .await?;
        Ok(SubscriptionGrant {
            token: parse_subscription(&body)?,
        })
    }

    async fn unsubscribe(
        &self,
        name: &str,
        client_uid: &str,
        token: Option<&str>,
    ) -> Result<(), SyncError> {
        let mut url = self.url(&["Marti", "api", "missions", name, "subscription"])?;
        url.query_pairs_mut().append_pair("uid", client_uid);
        self.send(self.request(Method::DELETE, url, token), Some(name))
            .await?;
        Ok(())
    }

    async fn fetch_cot(&self, uid: &str, token: Option<&str>) -> Result<Vec<u8>, SyncError> {
        let url = self.url(&["Marti", "api", "cot", "xml", uid])?;
        self.send(self.request(Method::GET, url, token), None).await
    }
}
