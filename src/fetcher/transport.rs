//! HTTP transport abstraction.
//!
//! [`HttpTransport`] is the seam between the retry/breaker logic in
//! [`Fetcher`](super::Fetcher) and the network. Production code uses
//! [`ReqwestTransport`], which owns the single pooled `reqwest::Client` for
//! the whole process; tests plug in scripted transports.

use crate::config::FetcherConfig;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

/// Raw HTTP answer, before any status or content classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Where the body actually came from, when redirects moved the request.
    pub final_url: Option<String>,
}

impl HttpResponse {
    /// A response served from the requested URL.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            final_url: None,
        }
    }

    /// Record the URL the response was served from after redirects.
    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = Some(url.into());
        self
    }
}

/// Failures below the HTTP status level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request or body read exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Connection could not be established or was reset.
    #[error("connection error: {0}")]
    Connect(String),
    /// The body arrived but could not be decoded.
    #[error("undecodable body: {0}")]
    Body(String),
    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_))
    }
}

/// Something that can perform a GET request.
///
/// Implementations must be safe to call from many concurrent fetches.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpTransport> HttpTransport for Arc<T> {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.as_ref().get(url).await
    }
}

/// [`HttpTransport`] backed by one shared, pooled `reqwest::Client`.
///
/// The client keeps `pool_max_idle_per_host` idle connections per host and a
/// semaphore caps requests in flight at `max_connections`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl ReqwestTransport {
    /// Build the shared client.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest::Error` if the TLS backend or client cannot be initialised.
    pub fn new(config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(classify)?;
        debug!(%url, %final_url, status, bytes = body.len(), "HTTP response received");
        Ok(HttpResponse::new(status, body).with_final_url(final_url))
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else if e.is_decode() || e.is_body() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}
