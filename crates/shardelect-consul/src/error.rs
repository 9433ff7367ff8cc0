//! Error types for the Consul client

use reqwest::StatusCode;

/// Errors that can occur while talking to the Consul HTTP API
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: StatusCode, body: String },

    #[error("blocking query returned index {0}, expected a positive value")]
    InvalidIndex(u64),

    #[error("missing or malformed X-Consul-Index header")]
    MissingIndex,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
