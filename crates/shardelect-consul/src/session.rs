//! Session lifecycle client
//!
//! Sessions are the liveness primitive behind session-acquired KV entries:
//! an unrenewed session expires after its TTL and the backend releases or
//! deletes everything it acquired.

use std::time::Duration;

use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::error::Result;
use crate::http::{ConsulConfig, ConsulHttp};
use crate::model::{SessionBehavior, SessionCreateRequest, SessionCreateResponse};

/// A session owned by this process.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub ttl: Duration,
    pub behavior: SessionBehavior,
}

/// Typed client for the `/v1/session` endpoints
#[derive(Clone)]
pub struct SessionClient {
    http: ConsulHttp,
}

impl SessionClient {
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        Ok(Self {
            http: ConsulHttp::new(config)?,
        })
    }

    pub fn from_http(http: ConsulHttp) -> Self {
        Self { http }
    }

    /// Create a session with the given TTL and invalidation behavior.
    pub async fn create(&self, ttl: Duration, behavior: SessionBehavior) -> Result<Session> {
        let request = SessionCreateRequest {
            ttl: format!("{}s", ttl.as_secs()),
            behavior,
        };
        let body = serde_json::to_vec(&request)?;
        let response = self
            .http
            .request(
                Method::PUT,
                &["session", "create"],
                &[],
                Some(body),
                HeaderMap::new(),
                None,
            )
            .await?;
        if !response.status.is_success() {
            return Err(response.into_request_failed());
        }
        let created: SessionCreateResponse = response.json()?;
        debug!("created session {} with ttl {:?}", created.id, ttl);

        Ok(Session {
            id: created.id,
            ttl,
            behavior,
        })
    }

    /// Renew a session's TTL.
    ///
    /// Returns `false` when the backend no longer knows the session.
    pub async fn renew(&self, id: &str) -> Result<bool> {
        let response = self
            .http
            .request(
                Method::PUT,
                &["session", "renew", id],
                &[],
                None,
                HeaderMap::new(),
                None,
            )
            .await?;
        match response.status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response.into_request_failed()),
        }
    }

    /// Destroy a session, releasing everything it acquired.
    pub async fn destroy(&self, id: &str) -> Result<bool> {
        let response = self
            .http
            .request(
                Method::PUT,
                &["session", "destroy", id],
                &[],
                None,
                HeaderMap::new(),
                None,
            )
            .await?;
        if response.status != StatusCode::OK {
            return Ok(false);
        }
        Ok(response.json().unwrap_or(false))
    }
}
