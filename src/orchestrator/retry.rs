//! Centralized retry/backoff policy (spec §9 redesign flag: "ad-hoc
//! retry/backoff sprinkled across call-paths... centralize in a
//! `RetryPolicy{base,max,jitter,classify}` value object reused by
//! adapter, notification, and delivery workers").

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Outbound originate retries (spec §4.3): base 5s, max 60s, 3 attempts.
    pub fn originate() -> Self {
        Self { base: Duration::from_secs(5), max: Duration::from_secs(60), max_attempts: 3, jitter: Duration::from_millis(0) }
    }

    /// Notification fan-out retries (spec §4.6): base 5s, max 60s, 3 attempts.
    pub fn notification() -> Self {
        Self { base: Duration::from_secs(5), max: Duration::from_secs(60), max_attempts: 3, jitter: Duration::from_millis(0) }
    }

    /// Delivery engine retries (spec §4.8): `30s * 2^(n-1)` capped at 1h, plus jitter up to 5s.
    pub fn delivery(max_attempts: u32) -> Self {
        Self { base: Duration::from_secs(30), max: Duration::from_secs(3600), max_attempts, jitter: Duration::from_secs(5) }
    }

    /// Backoff delay before attempt number `attempt` (1-indexed), with
    /// exponential growth capped at `max` plus uniform jitter in
    /// `[0, jitter)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let scaled = self.base.as_millis().saturating_mul(1u128 << exp.min(30));
        let capped = scaled.min(self.max.as_millis());
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter.as_millis().max(1) as u64)
        };
        Duration::from_millis(capped as u64 + jitter_ms)
    }

    pub fn exhausted(&self, attempts_so_far: u32) -> bool {
        attempts_so_far >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy::originate();
        assert_eq!(policy.delay_for_attempt(1).as_secs(), 5);
        assert_eq!(policy.delay_for_attempt(2).as_secs(), 10);
        assert!(policy.delay_for_attempt(10).as_secs() <= 60);
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let policy = RetryPolicy::originate();
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
