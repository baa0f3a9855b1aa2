//! Exponential backoff with jitter.
//!
//! `delay = min(base · factor^(attempt-1), max) ± jitter%`. Attempts never
//! overlap: callers sleep for the delay and then make the next call.

use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_ms: u64,
    /// Growth factor per attempt.
    pub factor: f64,
    /// Upper bound before jitter.
    pub max_ms: u64,
    /// Jitter as a percentage of the delay (20 means ±20%).
    pub jitter_pct: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 250,
            factor: 2.0,
            max_ms: 2000,
            jitter_pct: 20,
        }
    }
}

impl RetryPolicy {
    /// Delay before `attempt` (1-based) without jitter.
    pub fn nominal_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_ms as f64 * self.factor.max(1.0).powi(exponent);
        if raw.is_finite() {
            raw.min(self.max_ms as f64) as u64
        } else {
            self.max_ms
        }
    }
}

/// Delay before `attempt` (1-based) with uniform jitter applied.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let nominal = policy.nominal_delay_ms(attempt) as f64;
    let spread = policy.jitter_pct.min(100) as f64 / 100.0;
    // Jitter: (1 - spread)x to (1 + spread)x
    let jitter = 1.0 - spread + rand::random::<f64>() * 2.0 * spread;
    Duration::from_millis((nominal * jitter).max(0.0) as u64)
}
