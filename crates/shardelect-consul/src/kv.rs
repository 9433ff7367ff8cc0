//! Typed wrappers over the Consul KV verbs
//!
//! Writes return the backend's JSON boolean: `false` means a CAS or
//! session-acquire precondition failed, never an error. Reads carry the
//! blocking-query index so callers can long-poll for changes.

use std::time::Duration;

use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::error::Result;
use crate::http::{ConsulConfig, ConsulHttp, HttpResponse};
use crate::model::KvEntry;

/// Extra HTTP timeout slack on top of a blocking query's `wait`.
pub const BLOCKING_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

/// Options for [`KvClient::put`]
#[derive(Clone, Debug, Default)]
pub struct PutOptions<'a> {
    /// Check-and-set on `ModifyIndex`; 0 means "create, must not exist".
    pub cas: Option<u64>,
    /// Session id acquiring the entry.
    pub acquire: Option<&'a str>,
}

/// Options for [`KvClient::get`]
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Turn the read into a blocking query held open for up to this long.
    pub wait: Option<Duration>,
    /// Index to block past; only sent together with `wait`.
    pub index: Option<u64>,
    /// Read every entry under the key as a prefix.
    pub prefix: bool,
    /// Force a fully consistent read.
    pub consistent: bool,
}

/// Result of a KV read together with the blocking-query index.
///
/// `entries` is empty when the key does not exist (a 404 is "no value", not
/// an error, so blocking queries can wait for key creation).
#[derive(Debug, Clone, PartialEq)]
pub struct KvRead {
    pub entries: Vec<KvEntry>,
    pub index: u64,
}

impl KvRead {
    /// The single entry of a non-prefix read, if any.
    pub fn into_single(mut self) -> Option<KvEntry> {
        self.entries.pop()
    }
}

/// Next remembered index after a blocking read.
///
/// A returned index lower than the previous one means the answering server
/// is behind; resetting to zero forces a fresh non-blocking read.
pub fn advance_index(previous: u64, returned: u64) -> u64 {
    if returned < previous { 0 } else { returned }
}

/// Typed client for the `/v1/kv` endpoints
#[derive(Clone)]
pub struct KvClient {
    http: ConsulHttp,
}

impl KvClient {
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        Ok(Self {
            http: ConsulHttp::new(config)?,
        })
    }

    pub fn from_http(http: ConsulHttp) -> Self {
        Self { http }
    }

    /// The underlying HTTP client, for sharing with the session client.
    pub fn http(&self) -> &ConsulHttp {
        &self.http
    }

    /// Write `value` at `key`.
    ///
    /// Returns `false` when the CAS or acquire precondition fails.
    pub async fn put(&self, key: &str, value: Vec<u8>, opts: PutOptions<'_>) -> Result<bool> {
        let mut query: Vec<(&str, Option<String>)> = Vec::new();
        if let Some(cas) = opts.cas {
            query.push(("cas", Some(cas.to_string())));
        }
        if let Some(acquire) = opts.acquire {
            query.push(("acquire", Some(acquire.to_string())));
        }

        let segments = key_segments(key);
        let response = self
            .http
            .request(
                Method::PUT,
                &segments,
                &query,
                Some(value),
                HeaderMap::new(),
                None,
            )
            .await?;
        parse_bool(response)
    }

    /// Delete `key`, optionally guarded by CAS.
    pub async fn delete(&self, key: &str, cas: Option<u64>) -> Result<bool> {
        let mut query: Vec<(&str, Option<String>)> = Vec::new();
        if let Some(cas) = cas {
            query.push(("cas", Some(cas.to_string())));
        }

        let segments = key_segments(key);
        let response = self
            .http
            .request(
                Method::DELETE,
                &segments,
                &query,
                None,
                HeaderMap::new(),
                None,
            )
            .await?;
        parse_bool(response)
    }

    /// Delete every entry under `prefix`.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<bool> {
        let query: Vec<(&str, Option<String>)> = vec![("recurse", Some("true".to_string()))];
        let segments = key_segments(prefix);
        let response = self
            .http
            .request(
                Method::DELETE,
                &segments,
                &query,
                None,
                HeaderMap::new(),
                None,
            )
            .await?;
        parse_bool(response)
    }

    /// Read `key`, or everything under it with `opts.prefix`.
    ///
    /// With `opts.wait` the call becomes a blocking query: the backend holds
    /// it open until the key's index moves past `opts.index` or the wait
    /// elapses. The HTTP timeout is widened accordingly.
    pub async fn get(&self, key: &str, opts: GetOptions) -> Result<KvRead> {
        let mut query: Vec<(&str, Option<String>)> = Vec::new();
        if let Some(wait) = opts.wait {
            query.push(("wait", Some(format_wait(wait))));
            query.push(("index", Some(opts.index.unwrap_or(0).to_string())));
        }
        if opts.prefix {
            query.push(("recurse", Some("true".to_string())));
        }
        if opts.consistent {
            query.push(("consistent", Some("true".to_string())));
        }

        let timeout = opts.wait.map(|wait| wait + BLOCKING_TIMEOUT_SLACK);
        let segments = key_segments(key);
        let response = self
            .http
            .request(Method::GET, &segments, &query, None, HeaderMap::new(), timeout)
            .await?;

        // Error responses carry no index header; only the 404 and success
        // shapes are required to.
        match response.status {
            StatusCode::NOT_FOUND => {
                let index = response.consul_index()?;
                Ok(KvRead {
                    entries: Vec::new(),
                    index,
                })
            }
            status if status.is_success() => {
                let index = response.consul_index()?;
                let entries: Vec<KvEntry> = response.json()?;
                Ok(KvRead { entries, index })
            }
            _ => Err(response.into_request_failed()),
        }
    }
}

fn key_segments(key: &str) -> Vec<&str> {
    let mut segments = vec!["kv"];
    segments.extend(key.split('/').filter(|s| !s.is_empty()));
    segments
}

fn parse_bool(response: HttpResponse) -> Result<bool> {
    if !response.status.is_success() {
        return Err(response.into_request_failed());
    }
    response.json()
}

fn format_wait(wait: Duration) -> String {
    format!("{}s", wait.as_secs().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_segments_split_on_slash() {
        assert_eq!(key_segments("a/b/c"), vec!["kv", "a", "b", "c"]);
        assert_eq!(key_segments("/a//b/"), vec!["kv", "a", "b"]);
        assert_eq!(key_segments("lock"), vec!["kv", "lock"]);
    }

    #[test]
    fn test_format_wait() {
        assert_eq!(format_wait(Duration::from_secs(20)), "20s");
        assert_eq!(format_wait(Duration::from_millis(200)), "1s");
    }

    #[test]
    fn test_advance_index() {
        assert_eq!(advance_index(0, 5), 5);
        assert_eq!(advance_index(5, 5), 5);
        assert_eq!(advance_index(5, 50), 50);
        // A regressed index resets to zero so the next read is non-blocking.
        assert_eq!(advance_index(50, 30), 0);
    }

    #[test]
    fn test_kv_read_into_single() {
        let read = KvRead {
            entries: Vec::new(),
            index: 1,
        };
        assert!(read.into_single().is_none());
    }
}
