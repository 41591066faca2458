//! Network transport abstraction and the reqwest-backed implementation
//!
//! The coordinator never talks to reqwest directly; it sends a
//! [`DownloadRequest`] through a [`Transport`] and consumes the body as a
//! stream of chunks.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Jitter, Quota, RateLimiter};
use parking_lot::Mutex;
use reqwest::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, PRAGMA};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::http;
use crate::errors::{DownloadError, DownloadResult, TransportErrorKind};

use super::types::{DownloadRequest, ResponseHead};

/// Response returned by a transport, with a streaming body
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub expected_length: Option<u64>,
    pub headers: BTreeMap<String, String>,
    pub body: BoxStream<'static, DownloadResult<Bytes>>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("expected_length", &self.expected_length)
            .finish()
    }
}

impl TransportResponse {
    /// Split into the head and the body stream
    pub fn into_parts(self) -> (ResponseHead, BoxStream<'static, DownloadResult<Bytes>>) {
        let head = ResponseHead {
            status: self.status,
            content_type: self.content_type,
            expected_length: self.expected_length,
            headers: self.headers,
        };
        (head, self.body)
    }
}

/// Sends download requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &DownloadRequest) -> DownloadResult<TransportResponse>;
}

/// Configuration for the HTTP transport's client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Enable HTTP/2 adaptive window
    pub http2: bool,
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of idle connections per host
    pub pool_max_per_host: usize,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Rate limit in requests per second (0 disables limiting)
    pub rate_limit_rps: u32,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http2: false,
            tcp_keepalive: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            connect_timeout: http::CONNECT_TIMEOUT,
            rate_limit_rps: 0,
            user_agent: http::USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Builds an HTTP client for one combination of cookie and certificate handling
    pub fn build_http_client(
        &self,
        handle_cookies: bool,
        allow_invalid_certificates: bool,
    ) -> DownloadResult<Client> {
        let mut client_builder = Client::builder()
            .cookie_store(handle_cookies)
            .danger_accept_invalid_certs(allow_invalid_certificates)
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.as_str())
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if self.http2 {
            client_builder = client_builder.http2_adaptive_window(true);
        }

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder.build().map_err(|e| {
            DownloadError::transport(
                TransportErrorKind::Other,
                format!("Failed to build HTTP client: {}", e),
            )
        })
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Transport backed by reqwest
///
/// One client is kept per cookie/certificate combination, built on first use.
pub struct HttpTransport {
    config: ClientConfig,
    clients: Mutex<HashMap<(bool, bool), Client>>,
    rate_limiter: Option<DirectRateLimiter>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport, building the default client eagerly
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the HTTP client cannot be built
    pub fn new(config: ClientConfig) -> DownloadResult<Self> {
        let default_client = config.build_http_client(false, false)?;
        let mut clients = HashMap::new();
        clients.insert((false, false), default_client);

        let rate_limiter = NonZeroU32::new(config.rate_limit_rps)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            config,
            clients: Mutex::new(clients),
            rate_limiter,
        })
    }

    fn client_for(&self, request: &DownloadRequest) -> DownloadResult<Client> {
        let key = (request.handle_cookies, request.allow_invalid_certificates);
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = self.config.build_http_client(key.0, key.1)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &DownloadRequest) -> DownloadResult<TransportResponse> {
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
                .await;
        }

        let client = self.client_for(request)?;
        let mut builder = client
            .get(request.url.as_str())
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.ignore_cached_response {
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }
        if let Some((username, password)) = &request.credentials {
            builder = builder.basic_auth(username, Some(password));
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let expected_length = response.content_length().or_else(|| {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
        });
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        debug!("Received {} for {}", status, request.url);

        let body = stream::unfold(Some(response), |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(response))),
                Ok(None) => None,
                Err(e) => Some((Err(DownloadError::from(e)), None)),
            }
        })
        .boxed();

        Ok(TransportResponse {
            status,
            content_type,
            expected_length,
            headers,
            body,
        })
    }
}
