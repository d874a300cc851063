use super::{
    Transport, parse_response,
    policy::{RateLimitRetryPolicy, RetryPolicy},
};
use crate::{
    config::validate_rpc_url,
    error::{ConfigError, TransportError},
};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::{
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use url::Url;
use wallet_rpc::Request;

/// Default timeout of a single HTTP request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// JSON-RPC over HTTP, retrying failures the [RetryPolicy] considers transient.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
    max_retry: u32,
    initial_backoff: Duration,
    policy: Box<dyn RetryPolicy>,
}

// === impl HttpTransport ===

impl HttpTransport {
    /// Returns a new builder for the given endpoint
    pub fn builder(url: &str) -> HttpTransportBuilder {
        HttpTransportBuilder::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send_once(&self, request: &Request) -> Result<Value, TransportError> {
        let body = serde_json::to_vec(request)
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        let res = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(into_transport_error)?;
        let status = res.status();
        let body = res.bytes().await.map_err(into_transport_error)?;

        let value = serde_json::from_slice::<Value>(&body);
        // the blocked response is sent with an error status
        if let Ok(value) = &value
            && is_region_blocked(value)
        {
            return Err(TransportError::RegionBlocked);
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let value = value.map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        parse_response(value)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, mut request: Request) -> Result<Value, TransportError> {
        request.id = self.next_id.fetch_add(1, Ordering::Relaxed).into();
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retry && self.policy.should_retry(&err) => {
                    let backoff = self
                        .policy
                        .backoff_hint(&err)
                        .unwrap_or_else(|| self.initial_backoff * 2u32.saturating_pow(attempt));
                    attempt += 1;
                    debug!(
                        target: "transport::http",
                        method = %request.method, ?err, attempt, ?backoff,
                        "retrying request"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    trace!(
                        target: "transport::http",
                        method = %request.method,
                        ?err,
                        "request failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

fn is_region_blocked(value: &Value) -> bool {
    value.get("error").and_then(Value::as_str) == Some(super::REGION_BLOCKED_ERROR)
}

fn into_transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// Helper type to construct an [HttpTransport]
#[derive(Debug)]
pub struct HttpTransportBuilder {
    // Note: this is a result, so we can easily chain builder calls
    url: Result<Url, ConfigError>,
    max_retry: u32,
    initial_backoff: Duration,
    timeout: Duration,
    headers: Vec<String>,
}

// === impl HttpTransportBuilder ===

impl HttpTransportBuilder {
    /// Creates a new builder instance
    pub fn new(url_str: &str) -> Self {
        // invalid url: non-prefixed URL scheme is not allowed, so we prepend the default http
        // prefix
        let url = if url_str.starts_with("localhost:") {
            validate_rpc_url(&format!("http://{url_str}"))
        } else {
            validate_rpc_url(url_str)
        };

        Self {
            url,
            max_retry: 5,
            initial_backoff: Duration::from_millis(800),
            timeout: REQUEST_TIMEOUT,
            headers: vec![],
        }
    }

    /// Enables a request timeout.
    ///
    /// The timeout is applied from when the request starts connecting until the
    /// response body has finished.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How often to retry a failed request
    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// The starting backoff delay to use after the first failed request
    pub fn initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Sets http headers, formatted as `key:value`
    pub fn headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    /// Constructs the [HttpTransport] taking all configs into account.
    pub fn build(self) -> Result<HttpTransport, ConfigError> {
        let Self { url, max_retry, initial_backoff, timeout, headers } = self;
        let url = url?;

        let mut header_map = HeaderMap::new();
        for header in &headers {
            let (key, value) = parse_header(header)?;
            header_map.insert(key, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(header_map)
            .build()
            .map_err(|err| ConfigError::InvalidRpcUrl {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        Ok(HttpTransport {
            client,
            url,
            next_id: AtomicU64::new(1),
            max_retry,
            initial_backoff,
            policy: Box::new(RateLimitRetryPolicy),
        })
    }
}

fn parse_header(header: &str) -> Result<(HeaderName, HeaderValue), ConfigError> {
    let invalid = || ConfigError::InvalidHeader(header.to_string());
    let (key, value) = header.split_once(':').ok_or_else(invalid)?;
    let key = HeaderName::from_str(key.trim()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((key, value))
}
