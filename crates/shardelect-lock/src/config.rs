//! Lock configuration

use std::time::Duration;

use serde_json::Value;

/// Session TTL used when none is configured.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15);

/// Configuration for a [`crate::WLock`].
#[derive(Clone, Debug)]
pub struct LockConfig {
    /// KV prefix every key of this lock lives under.
    pub prefix: String,
    /// Contender weight; the highest live contender wins.
    pub weight: f64,
    /// Dampening delay before taking the lock from a live holder.
    pub delay: Duration,
    /// Opaque payload published with the contender and lock keys.
    pub info: Value,
    /// Backend session TTL.
    pub session_ttl: Duration,
}

impl LockConfig {
    pub fn new(prefix: &str, weight: f64) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            weight,
            delay: Duration::ZERO,
            info: Value::Null,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = info;
        self
    }

    pub fn with_session_ttl(mut self, session_ttl: Duration) -> Self {
        self.session_ttl = session_ttl;
        self
    }
}
