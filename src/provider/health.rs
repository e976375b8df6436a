//! Per-adapter health tracking: sliding error window, degraded/cooldown
//! state (spec §4.2). Structural precedent: the teacher keeps provider
//! state behind `parking_lot::Mutex` rather than an async lock since no
//! await happens while held.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::persistence::ProviderHealthRow;

pub struct ProviderHealth {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Timestamps of errors still inside the sliding window.
    errors: VecDeque<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    degraded: bool,
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                errors: VecDeque::new(),
                last_error_at: None,
                last_success_at: None,
                cooldown_until: None,
                degraded: false,
            }),
        }
    }

    pub fn from_row(row: &ProviderHealthRow) -> Self {
        let h = Self::new();
        {
            let mut inner = h.inner.lock();
            inner.last_error_at = row.last_error_at;
            inner.last_success_at = row.last_success_at;
            inner.cooldown_until = row.cooldown_until;
            inner.degraded = row.degraded;
        }
        h
    }

    /// Record an error and re-evaluate degraded status against `window`
    /// and `threshold` (spec §4.2: "if error_count >= threshold within the
    /// window, mark degraded and set cooldown_until").
    pub fn record_error(&self, window: Duration, threshold: u32, cooldown: Duration) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.errors.push_back(now);
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(120));
        while inner.errors.front().map(|t| *t < cutoff).unwrap_or(false) {
            inner.errors.pop_front();
        }
        inner.last_error_at = Some(now);
        if inner.errors.len() as u32 >= threshold {
            inner.degraded = true;
            inner.cooldown_until = Some(now + chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::seconds(60)));
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success_at = Some(Utc::now());
    }

    /// Clear degraded status once `cooldown_until` has passed. Returns
    /// `true` if this call transitioned the adapter out of degraded (the
    /// caller emits `provider.recovered` on that edge).
    pub fn recover_if_cooled_down(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.degraded {
            if let Some(until) = inner.cooldown_until {
                if Utc::now() >= until {
                    inner.degraded = false;
                    inner.errors.clear();
                    return true;
                }
            }
        }
        false
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.lock().degraded
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_error_at
    }

    pub fn to_row(&self, provider_name: &str) -> ProviderHealthRow {
        let inner = self.inner.lock();
        ProviderHealthRow {
            provider_name: provider_name.to_string(),
            error_count_window: inner.errors.len() as i64,
            last_error_at: inner.last_error_at,
            last_success_at: inner.last_success_at,
            cooldown_until: inner.cooldown_until,
            degraded: inner.degraded,
        }
    }
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_after_threshold_errors_in_window() {
        let h = ProviderHealth::new();
        for _ in 0..5 {
            h.record_error(Duration::from_secs(120), 5, Duration::from_secs(60));
        }
        assert!(h.is_degraded());
    }

    #[test]
    fn stays_healthy_below_threshold() {
        let h = ProviderHealth::new();
        for _ in 0..4 {
            h.record_error(Duration::from_secs(120), 5, Duration::from_secs(60));
        }
        assert!(!h.is_degraded());
    }
}
