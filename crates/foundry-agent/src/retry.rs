//! Backoff policies for task attempts.

use std::time::Duration;

use foundry_types::FoundryError;

/// Backoff policy controlling the delay between attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Fixed delay between attempts.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between attempts.
    #[default]
    None,
}

impl BackoffPolicy {
    /// Exponential backoff starting at `base`, capped at 30 seconds.
    pub fn exponential(base: Duration) -> Self {
        BackoffPolicy::Exponential {
            base,
            max: Duration::from_secs(30),
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }

    /// Delay before retrying after `err`. A rate limit's `retry_after` is
    /// honoured when the policy asks for any delay at all.
    pub fn delay_after(&self, attempt: usize, err: &FoundryError) -> Duration {
        let base = self.delay_for_attempt(attempt);
        match err {
            FoundryError::RateLimited { retry_after_ms, .. } if *self != BackoffPolicy::None => {
                base.max(Duration::from_millis(*retry_after_ms))
            }
            _ => base,
        }
    }
}
