//! Weighted distributed lock with delay for shard master election
//!
//! This crate provides:
//! - [`WLock`], a lock over a Consul KV prefix where the heaviest live
//!   contender wins and a configurable delay dampens failover churn
//! - [`Done`], the one-shot cancellation signal linking a lock, its
//!   background tasks and its caller
//! - pure snapshot parsing of contender and lock entries

pub mod config;
pub mod contender;
pub mod lock;
pub mod signal;

pub use config::LockConfig;
pub use contender::{ContenderValue, LockValue, PrefixSnapshot, parse_entries};
pub use lock::WLock;
pub use signal::Done;
