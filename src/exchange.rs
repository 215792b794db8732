// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Descriptors
//!
//! This module provides the immutable descriptors that tell a publisher where
//! its messages go: the `ExchangeBinding` for primary delivery and the optional
//! `DeadLetterRoute` used once the retry budget is exhausted.

use crate::errors::AmqpError;
use serde::Deserialize;
use std::fmt;

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - Default: The broker's pre-declared default exchange, never declared by us
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    Default,
}

impl ExchangeKind {
    /// Whether an exchange of this kind has to be declared before publishing.
    pub fn is_declarable(&self) -> bool {
        !matches!(self, ExchangeKind::Default)
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Default => "default",
        };
        f.write_str(kind)
    }
}

impl TryInto<lapin::ExchangeKind> for ExchangeKind {
    type Error = AmqpError;

    /// Converts the internal ExchangeKind to lapin's ExchangeKind.
    ///
    /// The default exchange always exists on the broker and cannot be declared.
    fn try_into(self) -> Result<lapin::ExchangeKind, AmqpError> {
        match self {
            ExchangeKind::Direct => Ok(lapin::ExchangeKind::Direct),
            ExchangeKind::Fanout => Ok(lapin::ExchangeKind::Fanout),
            ExchangeKind::Headers => Ok(lapin::ExchangeKind::Headers),
            ExchangeKind::Topic => Ok(lapin::ExchangeKind::Topic),
            ExchangeKind::Default => Err(AmqpError::InvalidBinding(
                "the default exchange cannot be declared".to_owned(),
            )),
        }
    }
}

/// Where a publisher sends its messages.
///
/// This struct implements the builder pattern. Once handed to a publisher it
/// is never modified again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeBinding {
    pub(crate) exchange: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) routing_keys: Vec<String>,
    pub(crate) queue_name: String,
}

impl ExchangeBinding {
    /// Creates a new binding to the given exchange.
    ///
    /// By default, the exchange is a Direct exchange with no routing keys and
    /// no queue.
    ///
    /// # Parameters
    /// * `exchange` - The name of the exchange
    ///
    /// # Returns
    /// A new binding with default settings
    pub fn new(exchange: &str) -> ExchangeBinding {
        ExchangeBinding {
            exchange: exchange.to_owned(),
            kind: ExchangeKind::Direct,
            routing_keys: vec![],
            queue_name: String::new(),
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange type to Direct.
    pub fn direct(self) -> Self {
        self.kind(ExchangeKind::Direct)
    }

    /// Sets the exchange type to Fanout.
    pub fn fanout(self) -> Self {
        self.kind(ExchangeKind::Fanout)
    }

    /// Sets the exchange type to Topic.
    pub fn topic(self) -> Self {
        self.kind(ExchangeKind::Topic)
    }

    /// Appends a routing key. Keys are used in the order they were added.
    ///
    /// # Parameters
    /// * `key` - The routing key
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_keys.push(key.to_owned());
        self
    }

    /// Replaces all routing keys.
    pub fn routing_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the queue that should be bound to the exchange with every
    /// routing key.
    ///
    /// When set, declaring the binding also declares this durable queue so
    /// that mandatory publishes are routable.
    pub fn queue(mut self, name: &str) -> Self {
        self.queue_name = name.to_owned();
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn keys(&self) -> &[String] {
        &self.routing_keys
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Checks that the binding can be published to.
    ///
    /// Every exchange kind except `Default` needs a non-empty exchange name.
    ///
    /// # Returns
    /// Ok(()) when valid or AmqpError::InvalidBinding
    pub fn validate(&self) -> Result<(), AmqpError> {
        if self.kind.is_declarable() && self.exchange.trim().is_empty() {
            return Err(AmqpError::InvalidBinding(format!(
                "{} exchange requires a name",
                self.kind
            )));
        }

        if self.routing_keys.iter().any(|k| k.len() > u8::MAX as usize) {
            return Err(AmqpError::InvalidBinding(
                "routing keys are limited to 255 bytes".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Fallback destination for messages that could not be confirmed on their
/// primary route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeadLetterRoute {
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
}

impl DeadLetterRoute {
    pub fn new(exchange: &str, routing_key: &str) -> DeadLetterRoute {
        DeadLetterRoute {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_binding_with_ordered_keys() {
        let binding = ExchangeBinding::new("orders")
            .topic()
            .routing_key("orders.created")
            .routing_key("orders.updated")
            .queue("orders-audit");

        assert_eq!(binding.exchange(), "orders");
        assert_eq!(binding.exchange_kind(), ExchangeKind::Topic);
        assert_eq!(binding.keys(), ["orders.created", "orders.updated"]);
        assert_eq!(binding.queue_name(), "orders-audit");
        assert!(binding.validate().is_ok());
    }

    #[test]
    fn should_reject_unnamed_declarable_exchange() {
        let err = ExchangeBinding::new("  ").fanout().validate().unwrap_err();
        assert!(matches!(err, AmqpError::InvalidBinding(_)));
    }

    #[test]
    fn should_accept_unnamed_default_exchange() {
        let binding = ExchangeBinding::new("")
            .kind(ExchangeKind::Default)
            .routing_key("jobs");

        assert!(binding.validate().is_ok());
        let converted: Result<lapin::ExchangeKind, AmqpError> = binding.kind.try_into();
        assert!(converted.is_err());
    }

    #[test]
    fn should_reject_oversized_routing_key() {
        let binding = ExchangeBinding::new("ex").routing_key(&"k".repeat(256));
        assert!(binding.validate().is_err());
    }

    #[test]
    fn should_deserialize_kind_from_lowercase() {
        let kind: ExchangeKind = serde_json::from_str("\"headers\"").unwrap();
        assert_eq!(kind, ExchangeKind::Headers);
        assert_eq!(kind.to_string(), "headers");
    }
}
