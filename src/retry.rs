// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry Policy
//!
//! Bounded, fixed-delay retry configuration for confirmed publishing.

use crate::{config::PublisherConfigs, errors::AmqpError};
use std::time::Duration;

/// Number of publish tries and the fixed pause between them.
///
/// The delay is applied between attempts only, never after the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a new retry policy.
    ///
    /// # Parameters
    /// * `max_attempts` - Total number of publish tries, at least one
    /// * `delay` - Pause between two consecutive tries
    ///
    /// # Returns
    /// The policy or AmqpError::InvalidRetryPolicy when `max_attempts` is zero
    pub fn new(max_attempts: u32, delay: Duration) -> Result<RetryPolicy, AmqpError> {
        if max_attempts == 0 {
            return Err(AmqpError::InvalidRetryPolicy);
        }

        Ok(RetryPolicy {
            max_attempts,
            delay,
        })
    }

    /// A policy with a single attempt and no delay.
    pub fn once() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a failed `attempt` (1-based) should be followed by a pause.
    pub(crate) fn delays_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts && !self.delay.is_zero()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl TryFrom<&PublisherConfigs> for RetryPolicy {
    type Error = AmqpError;

    fn try_from(cfg: &PublisherConfigs) -> Result<Self, Self::Error> {
        RetryPolicy::new(cfg.max_attempts, Duration::from_millis(cfg.retry_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_reject_zero_attempts() {
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO),
            Err(AmqpError::InvalidRetryPolicy)
        );
    }

    #[test]
    fn should_never_delay_after_last_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).unwrap();

        assert!(policy.delays_after(1));
        assert!(policy.delays_after(2));
        assert!(!policy.delays_after(3));
    }

    #[test]
    fn should_skip_zero_delay() {
        let policy = RetryPolicy::new(4, Duration::ZERO).unwrap();
        assert!(!policy.delays_after(1));
        assert!(!RetryPolicy::once().delays_after(1));
    }

    #[test]
    fn should_build_from_configs() {
        let cfg = PublisherConfigs {
            max_attempts: 5,
            retry_delay_ms: 250,
            ..Default::default()
        };

        let policy = RetryPolicy::try_from(&cfg).unwrap();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay(), Duration::from_millis(250));
    }
}
