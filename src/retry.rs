//! RetryPolicy - per-call retry and backoff decisions
//!
//! ## Responsibilities
//!
//! - Decide whether a provider error warrants another attempt
//! - Exponential backoff with a cap, jitter, and Retry-After support
//! - Deadline gate: never sleep when the remaining budget cannot cover
//!   the backoff plus a minimal call

use crate::providers::ProviderError;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Retry policy for one provider
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per provider, first call included
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
    /// Budget a call needs to be worth starting
    min_call_budget: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter: Duration,
        min_call_budget: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter,
            min_call_budget,
        }
    }

    /// Whether `error` after `attempt` completed attempts warrants a retry
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }

    /// Backoff before the attempt following `attempt`
    ///
    /// Doubles per attempt from the base delay, capped; a rate-limited
    /// response with a larger server-provided wait wins over the computed
    /// value.
    pub fn backoff_delay(&self, error: &ProviderError, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let mut delay = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);

        if let ProviderError::RateLimited {
            retry_after: Some(wait),
        } = error
        {
            delay = delay.max(*wait);
        }

        if !self.jitter.is_zero() {
            let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
            delay += Duration::from_millis(jitter_ms);
        }

        delay
    }

    /// Whether sleeping `delay` still leaves room for a minimal call
    /// before `deadline`
    pub fn can_wait(&self, delay: Duration, deadline: Instant) -> bool {
        let Some(wake) = Instant::now().checked_add(delay + self.min_call_budget) else {
            return false;
        };
        wake <= deadline
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Duration::from_secs(2),
            Duration::from_secs(8),
            Duration::from_millis(250),
            Duration::from_millis(1500),
        )
    }
}
