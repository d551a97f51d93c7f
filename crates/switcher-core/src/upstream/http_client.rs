use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;

use crate::upstream::UpstreamError;

/// Configuration for HTTP client concurrency.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent HTTP requests allowed
    pub concurrent_limit: usize,
    /// Permit acquisition timeout in milliseconds
    pub permit_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { concurrent_limit: 256, permit_timeout_ms: 5_000 }
    }
}

/// A fully buffered HTTP response.
///
/// The body is read eagerly so the response can be classified more than once
/// (structured parse first, raw text as fallback).
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of a header, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the parse error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Returns the body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Builds a header map from name/value pairs, later pairs overriding earlier ones.
///
/// Pairs that are not valid HTTP are skipped with a warning.
pub fn header_map<'a, I>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid header"),
        }
    }
    headers
}

/// HTTP client with semaphore-based concurrency control.
///
/// Redirects are never followed: bot-protection redirects (HTTP 307) must be seen by the
/// caller so it can store cookies before retrying.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Creates a new HTTP client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Creates a new HTTP client with the specified concurrency limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_concurrency_limit(concurrent_limit: usize) -> Result<Self, UpstreamError> {
        Self::with_config(HttpClientConfig { concurrent_limit, ..Default::default() })
    }

    /// Creates a new HTTP client with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(10))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("switcher/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            config,
        })
    }

    /// Sends a request and buffers the full response.
    ///
    /// When `timeout` is set, the whole exchange (headers and body) races a timer; a request
    /// that loses the race is dropped and its late completion is ignored.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Timeout`] if the timer wins the race
    /// - [`UpstreamError::ConcurrencyLimit`] if no permit could be acquired
    /// - [`UpstreamError::ConnectionFailed`] for transport failures
    /// - [`UpstreamError::InvalidRequest`] if the URL cannot be parsed
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, UpstreamError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| UpstreamError::InvalidRequest(format!("{url}: {e}")))?;

        let wait = Duration::from_millis(self.config.permit_timeout_ms);
        let Ok(Ok(_permit)) =
            tokio::time::timeout(wait, Arc::clone(&self.concurrent_limit).acquire_owned()).await
        else {
            tracing::warn!(
                url = %url,
                wait_ms = self.config.permit_timeout_ms,
                "no request permit available"
            );
            return Err(UpstreamError::ConcurrencyLimit(url.to_string()));
        };

        tracing::trace!(method = %method, url = %url, "sending request");

        let exchange = async {
            let response = self.client.request(method, url).headers(headers).send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(HttpResponse::new(status, headers, body))
        };

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::trace!(timeout_ms = limit.as_millis(), "http request timed out");
                    return Err(UpstreamError::Timeout);
                }
            },
            None => exchange.await,
        };

        result.map_err(|e| transport_error(&e))
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}

/// Maps a reqwest failure onto the transport taxonomy without leaking addresses or bodies.
fn transport_error(error: &reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        return UpstreamError::Timeout;
    }

    let reason = if error.is_connect() {
        "connection refused or unreachable"
    } else if error.is_body() || error.is_decode() {
        "response body could not be read"
    } else if error.is_request() {
        "request could not be sent"
    } else {
        "network error"
    };
    UpstreamError::ConnectionFailed(reason.to_string())
}
