//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Transport failures and non-2xx statuses are retried with exponential
//! backoff; JSON-RPC error objects are returned to the caller untouched.

use std::time::Duration;

use async_trait::async_trait;
use chainfilter_core::{JsonRpcRequest, JsonRpcResponse, RpcTransport, TransportError};
use tokio_retry::RetryIf;

/// Backoff schedule for transient HTTP failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first try.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Cap on a single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// The delays before each retry, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial_ms = self.initial_backoff.as_millis() as f64;
        let cap_ms = self.max_backoff.as_millis() as f64;
        let multiplier = self.multiplier;
        (0..self.max_retries).map(move |n| {
            let ms = (initial_ms * multiplier.powi(n as i32)).min(cap_ms);
            Duration::from_millis(ms as u64)
        })
    }
}

/// Configuration for [`HttpRpcClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC over HTTP POST.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl HttpRpcClient {
    /// Create a client for the JSON-RPC endpoint at `url`.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: config.retry,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut attempt = 0u32;
        let result = RetryIf::start(
            self.retry.delays(),
            || {
                attempt += 1;
                let req = &req;
                async move {
                    let result = self.send_once(req).await;
                    if let Err(e) = &result {
                        tracing::warn!(attempt, method = %req.method, error = %e, url = %self.url, "request failed");
                    }
                    result
                }
            },
            |e: &TransportError| e.is_retryable(),
        )
        .await;

        if let Err(e) = &result {
            tracing::error!(method = %req.method, error = %e, url = %self.url, "giving up on request");
        }
        result
    }

    fn url(&self) -> &str {
        &self.url
    }
}
