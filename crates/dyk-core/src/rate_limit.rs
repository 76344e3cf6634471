//! Dual token-bucket rate limiter.
//!
//! Two buckets (per second and per minute) refill continuously up to their
//! cap. [`RateLimiter::acquire`] waits until both hold a whole token and then
//! takes one from each. Waiters queue on a fair mutex, so permits are granted
//! in arrival order.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / window.as_secs_f64(),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Time until one whole token is available.
    fn wait_time(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        }
    }
}

#[derive(Debug)]
struct Buckets {
    per_second: Bucket,
    per_minute: Bucket,
}

/// Shared limiter; wrap in an `Arc` to use from many tasks.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            buckets: Mutex::new(Buckets {
                per_second: Bucket::new(config.requests_per_second, Duration::from_secs(1), now),
                per_minute: Bucket::new(config.requests_per_minute, Duration::from_secs(60), now),
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Wait for a permit. Never fails.
    ///
    /// Tokens are only taken once both buckets allow it, so dropping the
    /// future mid-wait leaves the budget untouched.
    pub async fn acquire(&self) {
        let mut buckets = self.buckets.lock().await;
        loop {
            let now = Instant::now();
            buckets.per_second.refill(now);
            buckets.per_minute.refill(now);

            let wait = buckets
                .per_second
                .wait_time()
                .max(buckets.per_minute.wait_time());
            if wait.is_zero() {
                buckets.per_second.tokens -= 1.0;
                buckets.per_minute.tokens -= 1.0;
                return;
            }

            trace!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}
