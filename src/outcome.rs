// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish Outcomes
//!
//! The terminal result of a confirmed publish. Intermediate attempt failures
//! never show up here; they are only logged.

use crate::errors::AmqpError;
use std::fmt;

/// Why a confirmed publish did not reach its primary route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Every attempt failed and no dead-letter route is configured.
    Exhausted { attempts: u32 },
    /// Every attempt failed and the dead-letter send failed too. The message
    /// is most likely lost.
    DeadLetterSend(AmqpError),
    /// The caller's cancellation signal fired.
    Cancelled,
}

/// What the caller learns from `safety_publish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker acknowledged the message on its primary route.
    Confirmed,
    /// Primary delivery failed; the message was preserved on the dead-letter
    /// route. Callers decide whether this warrants an alert.
    DeadLettered { attempts: u32 },
    Failed(FailureReason),
}

impl PublishOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, PublishOutcome::Confirmed)
    }

    /// Whether the message is either delivered or preserved on the dead-letter route.
    pub fn is_preserved(&self) -> bool {
        matches!(
            self,
            PublishOutcome::Confirmed | PublishOutcome::DeadLettered { .. }
        )
    }

    /// Converts the outcome into a `Result`.
    ///
    /// Everything except `Confirmed` is an error, including a successful
    /// dead-lettering, so callers using `?` never mistake it for delivery.
    pub fn into_result(self) -> Result<(), AmqpError> {
        match self {
            PublishOutcome::Confirmed => Ok(()),
            PublishOutcome::DeadLettered { attempts } => Err(AmqpError::DeadLettered(attempts)),
            PublishOutcome::Failed(FailureReason::Exhausted { attempts }) => {
                Err(AmqpError::Unconfirmed(attempts))
            }
            PublishOutcome::Failed(FailureReason::DeadLetterSend(err)) => {
                Err(AmqpError::PublishingToDLQError(err.to_string()))
            }
            PublishOutcome::Failed(FailureReason::Cancelled) => Err(AmqpError::Cancelled),
        }
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Confirmed => write!(f, "confirmed"),
            PublishOutcome::DeadLettered { attempts } => {
                write!(f, "dead-lettered after {attempts} attempts")
            }
            PublishOutcome::Failed(FailureReason::Exhausted { attempts }) => {
                write!(f, "exhausted after {attempts} attempts")
            }
            PublishOutcome::Failed(FailureReason::DeadLetterSend(err)) => {
                write!(f, "dlq send failed: {err}")
            }
            PublishOutcome::Failed(FailureReason::Cancelled) => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_only_treat_confirmed_as_ok() {
        assert_eq!(PublishOutcome::Confirmed.into_result(), Ok(()));
        assert_eq!(
            PublishOutcome::DeadLettered { attempts: 2 }.into_result(),
            Err(AmqpError::DeadLettered(2))
        );
        assert_eq!(
            PublishOutcome::Failed(FailureReason::Exhausted { attempts: 1 }).into_result(),
            Err(AmqpError::Unconfirmed(1))
        );
        assert_eq!(
            PublishOutcome::Failed(FailureReason::Cancelled).into_result(),
            Err(AmqpError::Cancelled)
        );
    }

    #[test]
    fn should_tell_lost_apart_from_quarantined() {
        let quarantined = PublishOutcome::DeadLettered { attempts: 3 };
        let lost = PublishOutcome::Failed(FailureReason::DeadLetterSend(
            AmqpError::PublishingError("channel closed".to_owned()),
        ));

        assert!(quarantined.is_preserved());
        assert!(!quarantined.is_confirmed());
        assert!(!lost.is_preserved());
        assert_eq!(lost.to_string(), "dlq send failed: failure to publish: channel closed");
    }
}
