use crate::config::RetryConfig;
use std::time::Duration;
use tracing::warn;

/// Decision returned by the retry policy after a failed fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try the whole fetch again after `delay` (includes 1-based attempt number).
    Retry { attempt: u32, delay: Duration },
    /// Exhausted all retries; degrade to an empty result.
    GiveUp,
}

/// Bounded retry policy for transient log-query faults.
///
/// Each retry restarts pagination from the first page, so a fetch either
/// returns every page or nothing.
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    current_attempt: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            max_delay_ms,
            current_attempt: 0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_delay_ms,
            config.max_delay_ms,
        )
    }

    /// Record a failed attempt and decide what to do next.
    pub fn on_failure(&mut self, error: &dyn std::fmt::Display) -> RetryDecision {
        self.current_attempt += 1;

        if self.current_attempt <= self.max_retries {
            let delay_ms = backoff_delay(
                self.initial_delay_ms,
                self.current_attempt - 1,
                self.max_delay_ms,
            );
            warn!(
                error = %error,
                attempt = self.current_attempt,
                max_retries = self.max_retries,
                delay_ms,
                "log fetch failed, retrying"
            );
            RetryDecision::Retry {
                attempt: self.current_attempt,
                delay: Duration::from_millis(delay_ms),
            }
        } else {
            warn!(
                error = %error,
                max_retries = self.max_retries,
                "log fetch retries exhausted"
            );
            RetryDecision::GiveUp
        }
    }

    /// Current attempt count (0 = no retries yet).
    #[allow(dead_code)]
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

/// Exponential backoff: `initial * 2^consecutive`, capped at `max`.
pub fn backoff_delay(initial_ms: u64, consecutive_count: u32, max_ms: u64) -> u64 {
    let shift = 1u64.checked_shl(consecutive_count).unwrap_or(u64::MAX);
    let delay = initial_ms.saturating_mul(shift);
    delay.min(max_ms)
}
