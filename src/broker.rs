// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Collaborators
//!
//! The publisher and the connection handle only talk to the broker through the
//! traits in this module. The lapin-backed implementations live in
//! [`crate::amqp`]; tests substitute mocks.

use crate::{errors::AmqpError, exchange::ExchangeBinding, message::Envelope};
use async_trait::async_trait;
use std::{fmt, future::Future, pin::Pin, sync::Arc};

/// Deferred broker acknowledgment for a confirmed publish.
///
/// Resolves to `true` when the broker durably accepted and routed the message.
pub struct Confirmation {
    inner: Pin<Box<dyn Future<Output = Result<bool, AmqpError>> + Send>>,
}

impl Confirmation {
    /// Wraps a future that resolves once the broker answers.
    pub fn new<F>(fut: F) -> Confirmation
    where
        F: Future<Output = Result<bool, AmqpError>> + Send + 'static,
    {
        Confirmation {
            inner: Box::pin(fut),
        }
    }

    /// A confirmation that is already resolved.
    pub fn ready(result: Result<bool, AmqpError>) -> Confirmation {
        Confirmation::new(std::future::ready(result))
    }

    /// Waits until the broker acknowledges or declines the message.
    pub async fn wait(self) -> Result<bool, AmqpError> {
        self.inner.await
    }
}

impl fmt::Debug for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Confirmation").finish_non_exhaustive()
    }
}

/// A send-capable channel. Implementations must be safe for concurrent use.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares what `binding` needs to exist on the broker.
    async fn declare(&self, binding: &ExchangeBinding) -> Result<(), AmqpError>;

    /// Sends the envelope to every routing key without waiting for the broker.
    async fn send(&self, envelope: &Envelope) -> Result<(), AmqpError>;

    /// Sends the envelope and returns a handle on the broker's confirmation.
    ///
    /// `Ok(None)` means the broker gave nothing to wait on.
    async fn send_with_confirm(&self, envelope: &Envelope)
        -> Result<Option<Confirmation>, AmqpError>;
}

/// The underlying broker connection, exclusively owned by a
/// [`crate::connection::ConnectionHandle`].
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Opens a channel in publisher confirm mode.
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// A consumer that has to be stopped before its connection is released.
#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    /// Identifies the consumer in log lines.
    fn tag(&self) -> String;

    /// Stops the consumer. May take arbitrarily long; the caller bounds it.
    async fn close(&self) -> Result<(), AmqpError>;
}
