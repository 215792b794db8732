// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Event Bus
//!
//! This module provides the error types used across the crate. `AmqpError`
//! covers every failure reported by the broker collaborators and by the
//! descriptor constructors. `AttemptError` describes why a single confirmed
//! publish attempt failed; it is only ever logged, never returned to callers.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Transport-level variants carry the broker client's message so that
/// `publish` can surface them to the caller verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error: {0}")]
    InternalError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error switching a channel into publisher confirm mode
    #[error("failure to enable publisher confirms: {0}")]
    ConfirmSelectError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error while waiting for a broker confirmation
    #[error("failure to wait for confirmation: {0}")]
    ConfirmationError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    ConsumerCancelError(String),

    /// The connection handle is closing or closed
    #[error("connection is closed")]
    ConnectionClosed,

    /// `close` was called on a handle that already began shutting down
    #[error("connection already closed")]
    AlreadyClosed,

    /// An exchange binding that cannot be published to
    #[error("invalid exchange binding: {0}")]
    InvalidBinding(String),

    /// A retry policy with zero attempts
    #[error("retry policy requires at least one attempt")]
    InvalidRetryPolicy,

    /// A JSON value that has no header representation
    #[error("unsupported header value for key `{0}`")]
    InvalidHeaderValue(String),

    /// Missing or malformed configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Primary delivery was not confirmed within the retry budget
    #[error("message was not confirmed after {0} attempts")]
    Unconfirmed(u32),

    /// Primary delivery failed but the message was sent to the dead-letter route
    #[error("message was not confirmed after {0} attempts, sent to dlq")]
    DeadLettered(u32),

    /// Error publishing a message to the Dead Letter Queue (DLQ)
    #[error("failure to publish to dlq: {0}")]
    PublishingToDLQError(String),

    /// The caller cancelled the publish before it completed
    #[error("publish cancelled")]
    Cancelled,
}

/// Reason a single confirmed publish attempt did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// The send call or the confirmation wait failed at the protocol layer
    #[error(transparent)]
    Transport(#[from] AmqpError),

    /// The broker gave nothing to wait on
    #[error("no confirmation received")]
    MissingConfirmation,

    /// The broker declined the message (nack or unroutable return)
    #[error("message was not acknowledged")]
    Unacknowledged,
}
