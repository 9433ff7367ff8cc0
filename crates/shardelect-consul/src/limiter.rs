//! Token bucket rate limiting for watch loops

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token bucket limiter.
///
/// Refills at `rate` tokens per second up to `burst`, starting with
/// `init_burst` tokens so fresh watchers can catch up without hammering the
/// backend from the first tick.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32, init_burst: u32) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(init_burst.min(burst)),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take a token, sleeping until one becomes available.
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
