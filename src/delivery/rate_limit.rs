//! Token-bucket rate limiting: one bucket per key (spec §5 "rate-limit
//! token buckets: one bucket per key; operations are atomic swap").
//! Buckets are created lazily and held in a `DashMap`, each guarded by
//! its own `parking_lot::Mutex` so one tenant's bucket never blocks
//! another's.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_minute: u32) -> Self {
        let capacity = per_minute.max(1) as f64;
        Self { capacity, tokens: capacity, refill_per_sec: capacity / 60.0, last_refill: Instant::now() }
    }

    fn try_acquire(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }

    /// Try to take one token from `key`'s bucket, creating it sized
    /// `per_minute` on first use. `Err(retry_after)` tells the caller how
    /// long to wait before the bucket refills enough for one more token.
    pub fn check(&self, key: &str, per_minute: u32) -> Result<(), Duration> {
        self.buckets.entry(key.to_string()).or_insert_with(|| Mutex::new(TokenBucket::new(per_minute)));
        self.buckets.get(key).expect("just inserted").value().lock().try_acquire()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_reports_retry_after() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("p:twilio", 3).is_ok());
        }
        assert!(limiter.check("p:twilio", 3).is_err());
    }
}
