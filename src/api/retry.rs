//! Retry budget and backoff schedule

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

const MIN_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Bounded exponential backoff, fixed at client construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Attempts are floored at 1 and the initial delay at 0.5s.
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: initial_delay.max(MIN_INITIAL_DELAY),
            max_delay,
        }
    }

    /// Build from fractional seconds as found in config files. Negative
    /// and non-finite values are treated as zero before flooring.
    pub fn from_secs_f64(max_attempts: u32, initial_delay: f64, max_delay: f64) -> Self {
        Self::new(max_attempts, secs(initial_delay), secs(max_delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to wait after `attempt` (1-based) failed:
    /// `min(initial * 2^(attempt-1), max)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Whether another attempt may follow `attempt`.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Drive `attempt` (called with the 1-based attempt number) until it
    /// yields a value `should_retry` accepts or the budget is spent; the last
    /// value is returned either way. Errors end the loop immediately.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        mut attempt: F,
        should_retry: impl Fn(&T) -> bool,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut n = 1;
        loop {
            let value = attempt(n).await?;
            if !should_retry(&value) || !self.allows_retry_after(n) {
                return Ok(value);
            }

            let delay = self.delay_after(n);
            tracing::warn!(attempt = n, "Retrying in {:?}", delay);
            tokio::time::sleep(delay).await;
            n += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, MIN_INITIAL_DELAY, Duration::from_secs(30))
    }
}

pub(crate) fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
