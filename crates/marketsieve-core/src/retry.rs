//! Exponential backoff for retryable upstream failures.

use std::time::Duration;

/// Backoff schedule: `base * factor^attempt`, capped at `max`, with optional
/// ±50 % jitter to decorrelate concurrent retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt as i32);
        let seconds = self.base.as_secs_f64() * scale;
        let capped = seconds.min(self.max.as_secs_f64());

        let mut delay = Duration::from_secs_f64(capped);

        if self.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
            if jitter_ms > 0 {
                let offset = fastrand::u64(0..=(jitter_ms * 2));
                let total_ms = delay.as_millis() as i64 + (offset as i64 - jitter_ms as i64);
                delay = Duration::from_millis(total_ms.max(0) as u64);
            }
        }

        delay
    }
}
