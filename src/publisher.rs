// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reliable Message Publisher
//!
//! This module provides the publisher that hands messages to a RabbitMQ
//! exchange. Two operations are offered:
//!
//! - `publish`: a single persistent send. The caller only learns whether the
//!   broker accepted the send call.
//! - `safety_publish`: a mandatory, persistent send whose broker confirmation
//!   is awaited. Failed attempts are retried with a fixed delay and, once the
//!   retry budget is exhausted, the message is escalated to the dead-letter
//!   route so it is never silently dropped.
//!
//! The caller's trace context is propagated in the message headers.

use crate::{
    broker::BrokerChannel,
    connection::ConnectionHandle,
    errors::{AmqpError, AttemptError},
    exchange::{DeadLetterRoute, ExchangeBinding},
    message::{Envelope, Message},
    otel,
    outcome::{FailureReason, PublishOutcome},
    retry::RetryPolicy,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::Context;
use std::{
    future::{self, Future},
    pin::Pin,
    sync::Weak,
};
use tracing::{error, info, warn};

/// Abstraction over publishers, so services can depend on a trait object.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Fire-and-forget durable send.
    async fn publish(&self, ctx: &Context, msg: &Message<'_>) -> Result<(), AmqpError>;

    /// Confirmed, retried, dead-lettered send.
    async fn safety_publish(&self, ctx: &Context, msg: &Message<'_>) -> PublishOutcome;
}

/// Result of one confirmed attempt.
enum Attempt {
    Acknowledged,
    Failed(AttemptError),
    Cancelled,
}

/// Publisher bound to one exchange, retry policy and dead-letter route.
///
/// It holds no resources of its own: the channel belongs to the
/// [`ConnectionHandle`] and stops working once the handle begins closing.
pub struct ReliablePublisher {
    channel: Weak<dyn BrokerChannel>,
    binding: ExchangeBinding,
    policy: RetryPolicy,
    dead_letter: Option<DeadLetterRoute>,
}

impl ReliablePublisher {
    /// Creates a publisher on an open connection handle.
    ///
    /// The binding is validated and declared on the broker (a durable
    /// exchange and, if named, a durable queue bound with every routing key).
    ///
    /// # Parameters
    /// * `handle` - An open connection handle
    /// * `binding` - Where messages go
    /// * `policy` - Retry budget of `safety_publish`
    ///
    /// # Returns
    /// The publisher or the validation/declaration error
    pub async fn new(
        handle: &ConnectionHandle,
        binding: ExchangeBinding,
        policy: RetryPolicy,
    ) -> Result<ReliablePublisher, AmqpError> {
        ReliablePublisher::on_channel(handle.channel().await?, binding, policy).await
    }

    /// Creates a publisher on a channel reference obtained from a handle.
    pub async fn on_channel(
        channel: Weak<dyn BrokerChannel>,
        binding: ExchangeBinding,
        policy: RetryPolicy,
    ) -> Result<ReliablePublisher, AmqpError> {
        binding.validate()?;

        let Some(strong) = channel.upgrade() else {
            return Err(AmqpError::ConnectionClosed);
        };
        strong.declare(&binding).await?;

        Ok(ReliablePublisher {
            channel,
            binding,
            policy,
            dead_letter: None,
        })
    }

    /// Sets the route messages are escalated to once retries are exhausted.
    pub fn with_dead_letter(mut self, route: DeadLetterRoute) -> Self {
        self.dead_letter = Some(route);
        self
    }

    pub fn binding(&self) -> &ExchangeBinding {
        &self.binding
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn dead_letter(&self) -> Option<&DeadLetterRoute> {
        self.dead_letter.as_ref()
    }

    /// Publishes a message without waiting for a broker confirmation.
    ///
    /// Transport errors are returned as reported by the broker client. This
    /// operation never retries and never uses the dead-letter route.
    ///
    /// # Parameters
    /// * `ctx` - OpenTelemetry context for tracing
    /// * `msg` - The message to publish
    pub async fn publish(&self, ctx: &Context, msg: &Message<'_>) -> Result<(), AmqpError> {
        let envelope = self.envelope(ctx, msg);

        match self.send(&envelope).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    request_id = msg.request_id,
                    exchange = %self.binding.exchange,
                    "error publishing message"
                );
                Err(err)
            }
            _ => Ok(()),
        }
    }

    /// Publishes a message and waits for the broker to confirm it.
    ///
    /// Equivalent to [`ReliablePublisher::safety_publish_until`] with a
    /// cancellation signal that never fires.
    pub async fn safety_publish(&self, ctx: &Context, msg: &Message<'_>) -> PublishOutcome {
        self.safety_publish_until(ctx, msg, future::pending()).await
    }

    /// Publishes a message and waits for the broker to confirm it, giving up
    /// when `cancel` completes.
    ///
    /// Every attempt is a mandatory, persistent send whose confirmation is
    /// awaited. A send error, a missing confirmation, a confirmation error or
    /// a nack counts as a failed attempt; the next attempt starts after the
    /// policy's delay. The first ack ends the call with `Confirmed`.
    ///
    /// After the last failed attempt the message is sent once to the
    /// dead-letter route, if one is configured.
    ///
    /// `cancel` is checked before every attempt and before escalation, and
    /// raced against the confirmation wait and the delay. Once it fires no
    /// further attempt and no escalation is made.
    /// Pass e.g. `tokio::time::sleep(deadline)` to bound the whole call.
    ///
    /// # Returns
    /// The terminal outcome; intermediate failures are only logged
    pub async fn safety_publish_until<F>(
        &self,
        ctx: &Context,
        msg: &Message<'_>,
        cancel: F,
    ) -> PublishOutcome
    where
        F: Future<Output = ()> + Send,
    {
        let envelope = self.envelope(ctx, msg).mandatory();
        let max_attempts = self.policy.max_attempts();
        tokio::pin!(cancel);

        for attempt in 1..=max_attempts {
            if fired(cancel.as_mut()) {
                return cancelled(msg, attempt);
            }

            let err = match self.attempt(&envelope, cancel.as_mut()).await {
                Attempt::Acknowledged => {
                    info!(request_id = msg.request_id, attempt, "message confirmed by RabbitMQ");
                    return PublishOutcome::Confirmed;
                }
                Attempt::Cancelled => return cancelled(msg, attempt),
                Attempt::Failed(err) => err,
            };

            error!(
                error = err.to_string(),
                request_id = msg.request_id,
                attempt,
                max_attempts,
                "publish attempt failed"
            );

            if self.policy.delays_after(attempt) {
                tokio::select! {
                    biased;
                    _ = cancel.as_mut() => return cancelled(msg, attempt),
                    _ = tokio::time::sleep(self.policy.delay()) => {}
                }
            }
        }

        if fired(cancel.as_mut()) {
            return cancelled(msg, max_attempts);
        }

        self.escalate(&envelope).await
    }

    /// Runs one confirmed attempt.
    async fn attempt<F>(&self, envelope: &Envelope, mut cancel: Pin<&mut F>) -> Attempt
    where
        F: Future<Output = ()>,
    {
        let confirmation = {
            let Some(channel) = self.channel.upgrade() else {
                return Attempt::Failed(AttemptError::Transport(AmqpError::ConnectionClosed));
            };

            match channel.send_with_confirm(envelope).await {
                Err(err) => return Attempt::Failed(AttemptError::Transport(err)),
                Ok(None) => return Attempt::Failed(AttemptError::MissingConfirmation),
                Ok(Some(confirmation)) => confirmation,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.as_mut() => Attempt::Cancelled,
            result = confirmation.wait() => match result {
                Ok(true) => Attempt::Acknowledged,
                Ok(false) => Attempt::Failed(AttemptError::Unacknowledged),
                Err(err) => Attempt::Failed(AttemptError::Transport(err)),
            },
        }
    }

    /// Sends the exhausted message to the dead-letter route, once.
    async fn escalate(&self, envelope: &Envelope) -> PublishOutcome {
        let attempts = self.policy.max_attempts();

        let Some(route) = &self.dead_letter else {
            error!(
                request_id = %envelope.request_id,
                attempts,
                "failure to publish message after retries, no dlq configured"
            );
            return PublishOutcome::Failed(FailureReason::Exhausted { attempts });
        };

        error!(
            request_id = %envelope.request_id,
            attempts,
            dlq_exchange = %route.exchange,
            "failure to publish message after retries, sending to dlq"
        );

        match self.send(&envelope.reroute(route)).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    request_id = %envelope.request_id,
                    "failure to send message to dlq"
                );
                PublishOutcome::Failed(FailureReason::DeadLetterSend(err))
            }
            _ => {
                info!(request_id = %envelope.request_id, "message sent to dlq");
                PublishOutcome::DeadLettered { attempts }
            }
        }
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), AmqpError> {
        match self.channel.upgrade() {
            Some(channel) => channel.send(envelope).await,
            None => Err(AmqpError::ConnectionClosed),
        }
    }

    /// Stamps the request id and the trace context into a private copy of the
    /// caller's headers.
    fn envelope(&self, ctx: &Context, msg: &Message<'_>) -> Envelope {
        let mut envelope = Envelope::stamped(&self.binding, msg);
        otel::inject(ctx, &mut envelope.headers);
        envelope
    }
}

/// Polls `cancel` once without waiting.
fn fired<F>(cancel: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    cancel.now_or_never().is_some()
}

fn cancelled(msg: &Message<'_>, attempt: u32) -> PublishOutcome {
    warn!(request_id = msg.request_id, attempt, "publish cancelled");
    PublishOutcome::Failed(FailureReason::Cancelled)
}

#[async_trait]
impl Publisher for ReliablePublisher {
    async fn publish(&self, ctx: &Context, msg: &Message<'_>) -> Result<(), AmqpError> {
        ReliablePublisher::publish(self, ctx, msg).await
    }

    async fn safety_publish(&self, ctx: &Context, msg: &Message<'_>) -> PublishOutcome {
        ReliablePublisher::safety_publish(self, ctx, msg).await
    }
}
