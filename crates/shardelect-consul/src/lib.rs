//! Consul HTTP client for shardelect
//!
//! This crate provides:
//! - a thin request helper over the `/v1` agent API with token auth and
//!   per-call timeouts
//! - typed KV operations with CAS, session-acquire and blocking-query
//!   semantics
//! - session create/renew/destroy
//! - rate-limited long-poll watchers over keys and prefixes

pub mod error;
pub mod http;
pub mod kv;
pub mod limiter;
pub mod model;
pub mod session;
pub mod watch;

pub use error::{Error, Result};
pub use http::{ConsulConfig, ConsulHttp, HttpResponse};
pub use kv::{GetOptions, KvClient, KvRead, PutOptions};
pub use model::{KvEntry, SessionBehavior};
pub use session::{Session, SessionClient};
pub use watch::{KvWatcher, WatchConfig, WatchHandle};
