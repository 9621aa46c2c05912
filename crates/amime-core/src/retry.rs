//! Retry policy for steps that retry their own external work.
//!
//! The engine never retries a step. A step that talks to something flaky
//! (an inference endpoint, say) carries a [`RetryPolicy`] and retries the
//! errors it classifies as retryable itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// How often, and how patiently, a step retries a failed call.
///
/// Serialized with a `kind` tag, e.g.
/// `{"kind": "fixed", "max_retries": 3, "delay": {"secs": 1, "nanos": 0}}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Give up after the first failure.
    #[default]
    None,
    /// Wait the same amount before every retry.
    Fixed {
        /// Retries after the first attempt.
        max_retries: u32,
        /// Pause before each retry.
        delay: Duration,
    },
    /// Multiply the pause after every retry, up to a cap.
    ExponentialBackoff {
        /// Retries after the first attempt.
        max_retries: u32,
        /// Pause before the first retry.
        initial_delay: Duration,
        /// Longest pause.
        max_delay: Duration,
        /// Growth factor between consecutive pauses.
        multiplier: u32,
    },
}

/// Rejected [`RetryPolicy`] parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RetryPolicyError(pub &'static str);

impl RetryPolicy {
    /// `max_retries` retries, `delay` apart.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Doubling backoff from `initial_delay`, capped at one minute.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: DEFAULT_MAX_DELAY.max(initial_delay),
            multiplier: 2,
        }
    }

    /// Exponential backoff with every parameter explicit.
    ///
    /// `multiplier` must be in `1..=10` and `max_delay` at least
    /// `initial_delay`.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if !(1..=10).contains(&multiplier) {
            return Err(RetryPolicyError("multiplier must be between 1 and 10"));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Number of retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. }
            | RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Pause before retry number `attempt + 1`, or `None` once the retry
    /// budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries() {
            return None;
        }
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = u64::from(*multiplier).saturating_pow(attempt);
                let millis = u64::try_from(initial_delay.as_millis())
                    .unwrap_or(u64::MAX)
                    .saturating_mul(factor);
                Some(Duration::from_millis(millis).min(*max_delay))
            }
        }
    }

    /// Every pause the policy allows, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries()).map_while(|attempt| self.delay_for_attempt(attempt))
    }
}
