// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module implements the broker collaborators on top of lapin. It
//! establishes connections to the RabbitMQ server, opens channels in
//! publisher confirm mode and translates envelopes into `basic_publish` calls.

use crate::{
    broker::{BrokerChannel, BrokerConnection, Confirmation, ConsumerHandle},
    config::RabbitMQConfigs,
    errors::AmqpError,
    exchange::ExchangeBinding,
    headers::{to_field_table, SHORT_STRING_LIMIT},
    message::Envelope,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use lapin::{
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::{self, PublisherConfirm},
    types::{FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use std::sync::Arc;
use tracing::{debug, error};

/// AMQP reply code for a normal shutdown
const REPLY_SUCCESS: u16 = 200;

/// Delivery mode marking a message as persistent
const PERSISTENT_DELIVERY: u8 = 2;
/// Delivery mode marking a message as transient
const TRANSIENT_DELIVERY: u8 = 1;

/// A lapin connection to RabbitMQ.
pub struct AmqpConnection {
    conn: Connection,
}

impl AmqpConnection {
    /// Connects to RabbitMQ.
    ///
    /// This function establishes a connection to RabbitMQ using configuration
    /// parameters provided in the `cfg` argument.
    ///
    /// # Parameters
    /// * `cfg` - Connection details like host, port, credentials, etc.
    ///
    /// # Returns
    /// The connection or AmqpError::ConnectionError
    ///
    /// # Example
    /// ```ignore
    /// let conn = AmqpConnection::connect(&cfg.rabbitmq).await?;
    /// ```
    pub async fn connect(cfg: &RabbitMQConfigs) -> Result<AmqpConnection, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        let conn = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), host = %cfg.host, "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        Ok(AmqpConnection { conn })
    }

    /// Opens a plain lapin channel, e.g. to start consumers on.
    pub async fn lapin_channel(&self) -> Result<Channel, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(c)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        let channel = self.lapin_channel().await?;

        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
        {
            error!(error = err.to_string(), "failure to enable publisher confirms");
            return Err(AmqpError::ConfirmSelectError(err.to_string()));
        }

        Ok(Arc::new(AmqpChannel::new(channel, true)))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        match self.conn.close(REPLY_SUCCESS, "shutdown").await {
            Err(err) => {
                error!(error = err.to_string(), "failure to close the connection");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Publishing side of a lapin channel.
pub struct AmqpChannel {
    channel: Channel,
    confirms: bool,
}

impl AmqpChannel {
    /// Wraps a lapin channel.
    ///
    /// # Parameters
    /// * `channel` - The lapin channel
    /// * `confirms` - Whether `confirm_select` was issued on the channel
    pub fn new(channel: Channel, confirms: bool) -> AmqpChannel {
        AmqpChannel { channel, confirms }
    }

    /// Publishes the envelope once per routing key.
    async fn publish_each(&self, envelope: &Envelope) -> Result<Vec<PublisherConfirm>, AmqpError> {
        let keys = routing_keys(&envelope.routing_keys);

        let mut confirms = Vec::with_capacity(keys.len());
        for key in keys {
            match self
                .channel
                .basic_publish(
                    &envelope.exchange,
                    key,
                    BasicPublishOptions {
                        immediate: false,
                        mandatory: envelope.mandatory,
                    },
                    &envelope.body,
                    properties(envelope),
                )
                .await
            {
                Ok(confirm) => confirms.push(confirm),
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        request_id = %envelope.request_id,
                        exchange = %envelope.exchange,
                        routing_key = key,
                        "error publishing message"
                    );
                    return Err(AmqpError::PublishingError(err.to_string()));
                }
            }
        }

        Ok(confirms)
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare(&self, binding: &ExchangeBinding) -> Result<(), AmqpError> {
        if binding.kind.is_declarable() {
            debug!("creating exchange: {}", binding.exchange);

            match self
                .channel
                .exchange_declare(
                    &binding.exchange,
                    binding.kind.try_into()?,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = %binding.exchange,
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(binding.exchange.clone()))
                }
                _ => Ok(()),
            }?;
        }

        if binding.queue_name.is_empty() {
            return Ok(());
        }

        debug!("creating queue: {}", binding.queue_name);
        if let Err(err) = self
            .channel
            .queue_declare(
                &binding.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
        {
            error!(error = err.to_string(), name = %binding.queue_name, "error to declare the queue");
            return Err(AmqpError::DeclareQueueError(binding.queue_name.clone()));
        }

        // the default exchange routes to every queue by name
        if !binding.kind.is_declarable() {
            return Ok(());
        }

        let keys = routing_keys(&binding.routing_keys);
        for key in keys {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange, key
            );

            if let Err(err) = self
                .channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange,
                    key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange.clone(),
                    binding.queue_name.clone(),
                ));
            }
        }

        Ok(())
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), AmqpError> {
        self.publish_each(envelope).await.map(|_| ())
    }

    async fn send_with_confirm(
        &self,
        envelope: &Envelope,
    ) -> Result<Option<Confirmation>, AmqpError> {
        if !self.confirms {
            self.publish_each(envelope).await?;
            return Ok(None);
        }

        let confirms = self.publish_each(envelope).await?;
        if confirms.is_empty() {
            return Ok(None);
        }

        Ok(Some(Confirmation::new(async move {
            let mut routed = true;
            for result in join_all(confirms).await {
                match result {
                    Ok(confirmation) => routed &= is_routed(confirmation)?,
                    Err(err) => return Err(AmqpError::ConfirmationError(err.to_string())),
                }
            }
            Ok(routed)
        })))
    }
}

/// No routing keys means a single publish with an empty key, which is what
/// fanout and headers exchanges expect.
fn routing_keys(keys: &[String]) -> Vec<&str> {
    if keys.is_empty() {
        return vec![""];
    }
    keys.iter().map(String::as_str).collect()
}

/// A message returned alongside an ack means the broker could not route a
/// mandatory publish.
fn is_routed(confirmation: publisher_confirm::Confirmation) -> Result<bool, AmqpError> {
    match confirmation {
        publisher_confirm::Confirmation::Ack(None) => Ok(true),
        publisher_confirm::Confirmation::Ack(Some(_)) => Ok(false),
        publisher_confirm::Confirmation::Nack(_) => Ok(false),
        publisher_confirm::Confirmation::NotRequested => Err(AmqpError::ConfirmationError(
            "confirmation not requested".to_owned(),
        )),
    }
}

/// Request ids that do not fit a short string travel in the headers only.
fn properties(envelope: &Envelope) -> BasicProperties {
    let delivery_mode = if envelope.persistent {
        PERSISTENT_DELIVERY
    } else {
        TRANSIENT_DELIVERY
    };

    let props = BasicProperties::default()
        .with_content_type(ShortString::from(envelope.content_type.as_str()))
        .with_delivery_mode(delivery_mode)
        .with_message_id(ShortString::from(envelope.message_id.as_str()))
        .with_headers(to_field_table(&envelope.headers));

    if envelope.request_id.len() > SHORT_STRING_LIMIT {
        return props;
    }
    props.with_correlation_id(ShortString::from(envelope.request_id.as_str()))
}

/// A lapin consumer registered on its own channel.
pub struct AmqpConsumer {
    channel: Channel,
    tag: String,
}

impl AmqpConsumer {
    /// Starts consuming `queue` on `channel`.
    ///
    /// # Returns
    /// The handle to register on the connection handle and the delivery stream
    pub async fn start(
        channel: Channel,
        queue: &str,
        tag: &str,
    ) -> Result<(AmqpConsumer, Consumer), AmqpError> {
        match channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => Ok((
                AmqpConsumer {
                    channel,
                    tag: tag.to_owned(),
                },
                consumer,
            )),
            Err(err) => {
                error!(error = err.to_string(), queue = queue, "failure to create the consumer");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl ConsumerHandle for AmqpConsumer {
    fn tag(&self) -> String {
        self.tag.clone()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if let Err(err) = self
            .channel
            .basic_cancel(&self.tag, BasicCancelOptions::default())
            .await
        {
            error!(error = err.to_string(), tag = %self.tag, "failure to cancel consumer");
            return Err(AmqpError::ConsumerCancelError(self.tag.clone()));
        }

        match self.channel.close(REPLY_SUCCESS, "consumer closed").await {
            Err(err) => Err(AmqpError::ChannelError(err.to_string())),
            _ => Ok(()),
        }
    }
}
