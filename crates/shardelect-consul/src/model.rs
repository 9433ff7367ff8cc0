//! Consul wire models

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// A single KV store entry as returned by the Consul API.
///
/// `Value` is transported base64-encoded; use [`KvEntry::raw_value`] to get
/// the stored bytes back. Equality is field-wise over the whole record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KvEntry {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "CreateIndex", default)]
    pub create_index: u64,

    #[serde(rename = "ModifyIndex", default)]
    pub modify_index: u64,

    #[serde(rename = "LockIndex", default)]
    pub lock_index: u64,

    #[serde(rename = "Flags", default)]
    pub flags: u64,

    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>, // Base64 encoded

    #[serde(rename = "Session", default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl KvEntry {
    /// Decode the base64 value to raw bytes.
    pub fn raw_value(&self) -> Option<Vec<u8>> {
        self.value.as_ref().and_then(|v| BASE64.decode(v).ok())
    }

    /// Decode the base64 value to a UTF-8 string.
    pub fn decoded_value(&self) -> Option<String> {
        self.raw_value()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    /// Encode raw bytes the way the backend transports them.
    pub fn encode_value(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }
}

/// What the backend does with session-acquired entries when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Acquired entries are deleted.
    Delete,
    /// Acquired entries are released but kept.
    Release,
}

/// Body of `PUT /v1/session/create`
#[derive(Debug, Clone, Serialize)]
pub struct SessionCreateRequest {
    #[serde(rename = "TTL")]
    pub ttl: String,

    #[serde(rename = "Behavior")]
    pub behavior: SessionBehavior,
}

/// Response of `PUT /v1/session/create`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreateResponse {
    #[serde(rename = "ID")]
    pub id: String,
}
