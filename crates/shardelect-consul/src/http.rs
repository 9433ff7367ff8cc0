//! HTTP request helper for the Consul API
//!
//! Builds `<address>/v1/...` URLs, applies the auth token header and the
//! default request timeout, and hands back raw responses. Status handling is
//! left to the typed clients built on top.

use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};

/// Address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "http://localhost:8500";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

const TOKEN_HEADER: &str = "X-Consul-Token";
const INDEX_HEADER: &str = "X-Consul-Index";

/// Configuration for the Consul HTTP client
#[derive(Clone, Debug)]
pub struct ConsulConfig {
    /// Base address of the Consul agent, e.g. "http://localhost:8500"
    pub address: String,
    /// ACL token sent as `X-Consul-Token` on every request
    pub token: Option<String>,
    /// Default request timeout
    pub timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ConsulConfig {
    /// Create a new config for a single agent address
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Set the ACL token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the default request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A raw response from the Consul agent.
///
/// Non-2xx statuses are not errors at this layer; callers inspect `status`.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parse the blocking-query index header.
    ///
    /// An absent or malformed header is a protocol error, as is an index of
    /// zero.
    pub fn consul_index(&self) -> Result<u64> {
        let raw = self.headers.get(INDEX_HEADER).ok_or(Error::MissingIndex)?;
        let index: u64 = raw
            .to_str()
            .ok()
            .and_then(|v| v.parse().ok())
            .ok_or(Error::MissingIndex)?;
        if index == 0 {
            return Err(Error::InvalidIndex(index));
        }
        Ok(index)
    }

    /// Convert a non-success response into the error carrying its status and
    /// body.
    pub fn into_request_failed(self) -> Error {
        Error::RequestFailed {
            status: self.status,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// HTTP client for the Consul agent API
#[derive(Clone)]
pub struct ConsulHttp {
    client: Client,
    base: Url,
    token: Option<HeaderValue>,
    timeout: Duration,
}

impl ConsulHttp {
    /// Create a new client from a config
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        let mut base = Url::parse(&config.address)
            .map_err(|e| anyhow!("invalid consul address '{}': {}", config.address, e))?;
        base.path_segments_mut()
            .map_err(|_| anyhow!("consul address '{}' cannot be a base URL", config.address))?
            .pop_if_empty()
            .push("v1");
        let token = match &config.token {
            Some(token) => Some(
                HeaderValue::from_str(token).map_err(|e| anyhow!("invalid consul token: {}", e))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            base,
            token,
            timeout: config.timeout,
        })
    }

    /// Build a URL under `/v1` from path segments, escaping each segment.
    pub fn url(&self, segments: &[&str], query: &[(&str, Option<String>)]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("consul base URL cannot be extended"))?
            .extend(segments);

        let pairs: Vec<(&str, &str)> = query
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
            .collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            let encoded = serde_urlencoded::to_string(&pairs)
                .map_err(|e| anyhow!("failed to encode query parameters: {}", e))?;
            url.set_query(Some(&encoded));
        }
        Ok(url)
    }

    /// Perform a request.
    ///
    /// Default headers (the token) are merged with `headers`; `timeout`
    /// overrides the configured default for this call only.
    pub async fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, Option<String>)],
        body: Option<Vec<u8>>,
        headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        let url = self.url(segments, query)?;
        let mut request = self
            .client
            .request(method, url)
            .timeout(timeout.unwrap_or(self.timeout));
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token.clone());
        }
        if !headers.is_empty() {
            request = request.headers(headers);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
