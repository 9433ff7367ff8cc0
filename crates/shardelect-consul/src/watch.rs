//! Long-poll watch loops over KV keys and prefixes
//!
//! A watcher repeats blocking reads against one key (or prefix) and invokes
//! its change callback only when the backend's answer actually differs from
//! the previous one. Call starts are paced by a token bucket so a rapidly
//! changing key cannot stampede the backend.

use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::error::Error;
use crate::kv::{GetOptions, KvClient, advance_index};
use crate::limiter::TokenBucket;
use crate::model::KvEntry;

/// Default blocking-query wait.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(20);

/// Default steady call rate, in calls per second.
pub const DEFAULT_RATE_LIMIT: f64 = 1.0;

/// Default token bucket capacity.
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 10;

/// Default tokens available to a fresh watcher.
pub const DEFAULT_RATE_LIMIT_INIT_BURST: u32 = 5;

/// Sleep between retries after a failed read.
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Subscription parameters for a watch loop.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub key: String,
    pub prefix: bool,
    pub consistent: bool,
    pub wait: Duration,
    pub rate_limit: f64,
    pub rate_limit_burst: u32,
    pub rate_limit_init_burst: u32,
    /// Index to resume blocking from; `None` starts with a fresh read.
    pub index: Option<u64>,
}

impl WatchConfig {
    /// Watch a single key.
    pub fn key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            prefix: false,
            consistent: false,
            wait: DEFAULT_WAIT,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_init_burst: DEFAULT_RATE_LIMIT_INIT_BURST,
            index: None,
        }
    }

    /// Watch every entry under a prefix.
    pub fn prefix(key: &str) -> Self {
        Self {
            prefix: true,
            ..Self::key(key)
        }
    }

    pub fn with_consistent(mut self, consistent: bool) -> Self {
        self.consistent = consistent;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_rate_limit(mut self, rate: f64, burst: u32, init_burst: u32) -> Self {
        self.rate_limit = rate;
        self.rate_limit_burst = burst;
        self.rate_limit_init_burst = init_burst;
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }
}

/// Stop handle for a running watch loop.
///
/// Stopping is idempotent; the loop exits after its current network wakeup.
/// Dropping the handle stops the loop as well.
pub struct WatchHandle {
    stop: watch::Sender<bool>,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

type ChangeFn = dyn Fn(&[KvEntry], u64) + Send + Sync;
type ErrorFn = dyn Fn(&Error) + Send + Sync;

/// A single watch subscription.
pub struct KvWatcher {
    client: KvClient,
    config: WatchConfig,
    on_change: Box<ChangeFn>,
    on_error: Box<ErrorFn>,
}

impl KvWatcher {
    /// Create a watcher that logs read errors at warn level.
    pub fn new(
        client: KvClient,
        config: WatchConfig,
        on_change: impl Fn(&[KvEntry], u64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            config,
            on_change: Box::new(on_change),
            on_error: Box::new(|err| warn!("watch read failed: {}", err)),
        }
    }

    /// Replace the default error handler.
    pub fn on_error(mut self, on_error: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Box::new(on_error);
        self
    }

    /// Start the watch loop on the current runtime.
    pub fn spawn(self) -> WatchHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(self.run(stop_rx));
        WatchHandle { stop: stop_tx }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        let limiter = TokenBucket::new(
            self.config.rate_limit,
            self.config.rate_limit_burst,
            self.config.rate_limit_init_burst,
        );
        // The request index is clamped for stale-server protection; the last
        // returned index is kept separately so a forced refetch of an
        // unchanged result does not refire the callback.
        let mut request_index: Option<u64> = self.config.index;
        let mut last_index: Option<u64> = None;
        let mut prev_entries: Option<Vec<KvEntry>> = None;
        let mut errored = false;

        loop {
            if *stop.borrow() {
                return;
            }

            tokio::select! {
                _ = limiter.acquire() => {}
                _ = stop.changed() => return,
            }

            if errored {
                // Force a fresh full read after an error.
                request_index = Some(0);
            }

            let opts = GetOptions {
                wait: Some(self.config.wait),
                index: request_index,
                prefix: self.config.prefix,
                consistent: self.config.consistent,
            };
            let read = tokio::select! {
                read = self.client.get(&self.config.key, opts) => read,
                _ = stop.changed() => return,
            };

            match read {
                Ok(read) => {
                    errored = false;
                    let changed = last_index != Some(read.index)
                        || prev_entries.as_deref() != Some(&read.entries[..]);
                    if changed {
                        (self.on_change)(&read.entries, read.index);
                    }
                    request_index = Some(advance_index(request_index.unwrap_or(0), read.index));
                    last_index = Some(read.index);
                    prev_entries = Some(read.entries);
                }
                Err(err) => {
                    (self.on_error)(&err);
                    errored = true;
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = stop.changed() => return,
                    }
                }
            }
        }
    }
}
