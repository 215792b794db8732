// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Settings supplied by the surrounding application: where the broker lives,
//! how the publisher retries, how long shutdown waits for consumers and how
//! logs are written. Every struct deserializes with serde and falls back to
//! defaults for missing fields; `Configs::from_env` reads the same settings
//! from environment variables.

use crate::{errors::AmqpError, exchange::DeadLetterRoute};
use serde::Deserialize;
use std::{str::FromStr, time::Duration};

pub const ENV_RABBITMQ_HOST: &str = "RABBITMQ_HOST";
pub const ENV_RABBITMQ_PORT: &str = "RABBITMQ_PORT";
pub const ENV_RABBITMQ_USER: &str = "RABBITMQ_USER";
pub const ENV_RABBITMQ_PASSWORD: &str = "RABBITMQ_PASSWORD";
pub const ENV_RABBITMQ_VHOST: &str = "RABBITMQ_VHOST";
pub const ENV_APP_NAME: &str = "APP_NAME";
pub const ENV_PUBLISHER_MAX_ATTEMPTS: &str = "PUBLISHER_MAX_ATTEMPTS";
pub const ENV_PUBLISHER_RETRY_DELAY_MS: &str = "PUBLISHER_RETRY_DELAY_MS";
pub const ENV_PUBLISHER_DLQ_EXCHANGE: &str = "PUBLISHER_DLQ_EXCHANGE";
pub const ENV_PUBLISHER_DLQ_ROUTING_KEY: &str = "PUBLISHER_DLQ_ROUTING_KEY";
pub const ENV_SHUTDOWN_CONSUMER_TIMEOUT_MS: &str = "SHUTDOWN_CONSUMER_TIMEOUT_MS";
pub const ENV_APP_ENV: &str = "APP_ENV";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Reported to the broker as the connection name.
    pub connection_name: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            connection_name: "eventbus".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    /// AMQP URI for these settings. A `/` in the vhost is percent-encoded.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user,
            self.password,
            self.host,
            self.port,
            self.vhost.replace('/', "%2f")
        )
    }
}

/// Retry budget and dead-letter destination of a reliable publisher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublisherConfigs {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub dlq_exchange: Option<String>,
    pub dlq_routing_key: Option<String>,
}

impl Default for PublisherConfigs {
    fn default() -> Self {
        PublisherConfigs {
            max_attempts: 3,
            retry_delay_ms: 1000,
            dlq_exchange: None,
            dlq_routing_key: None,
        }
    }
}

impl PublisherConfigs {
    /// The dead-letter route, present only when an exchange is configured.
    ///
    /// A missing routing key defaults to the empty key.
    pub fn dead_letter_route(&self) -> Option<DeadLetterRoute> {
        self.dlq_exchange.as_deref().map(|exchange| {
            DeadLetterRoute::new(exchange, self.dlq_routing_key.as_deref().unwrap_or_default())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShutdownConfigs {
    pub consumer_close_timeout_ms: u64,
}

impl Default for ShutdownConfigs {
    fn default() -> Self {
        ShutdownConfigs {
            consumer_close_timeout_ms: 5000,
        }
    }
}

impl ShutdownConfigs {
    pub fn consumer_close_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer_close_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfigs {
    /// `dev` logs human-readable lines, anything else logs JSON.
    pub env: String,
    pub level: String,
}

impl Default for LoggingConfigs {
    fn default() -> Self {
        LoggingConfigs {
            env: "dev".to_owned(),
            level: "info".to_owned(),
        }
    }
}

/// All settings of the crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Configs {
    pub rabbitmq: RabbitMQConfigs,
    pub publisher: PublisherConfigs,
    pub shutdown: ShutdownConfigs,
    pub logging: LoggingConfigs,
}

impl Configs {
    /// Parses settings from a JSON document.
    pub fn from_json(raw: &str) -> Result<Configs, AmqpError> {
        serde_json::from_str(raw).map_err(|err| AmqpError::ConfigError(err.to_string()))
    }

    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Configs, AmqpError> {
        Configs::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Configs, AmqpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Configs::default();
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        Ok(Configs {
            rabbitmq: RabbitMQConfigs {
                host: text(ENV_RABBITMQ_HOST, &defaults.rabbitmq.host),
                port: parse(&lookup, ENV_RABBITMQ_PORT, defaults.rabbitmq.port)?,
                user: text(ENV_RABBITMQ_USER, &defaults.rabbitmq.user),
                password: text(ENV_RABBITMQ_PASSWORD, &defaults.rabbitmq.password),
                vhost: text(ENV_RABBITMQ_VHOST, &defaults.rabbitmq.vhost),
                connection_name: text(ENV_APP_NAME, &defaults.rabbitmq.connection_name),
            },
            publisher: PublisherConfigs {
                max_attempts: parse(
                    &lookup,
                    ENV_PUBLISHER_MAX_ATTEMPTS,
                    defaults.publisher.max_attempts,
                )?,
                retry_delay_ms: parse(
                    &lookup,
                    ENV_PUBLISHER_RETRY_DELAY_MS,
                    defaults.publisher.retry_delay_ms,
                )?,
                dlq_exchange: lookup(ENV_PUBLISHER_DLQ_EXCHANGE),
                dlq_routing_key: lookup(ENV_PUBLISHER_DLQ_ROUTING_KEY),
            },
            shutdown: ShutdownConfigs {
                consumer_close_timeout_ms: parse(
                    &lookup,
                    ENV_SHUTDOWN_CONSUMER_TIMEOUT_MS,
                    defaults.shutdown.consumer_close_timeout_ms,
                )?,
            },
            logging: LoggingConfigs {
                env: text(ENV_APP_ENV, &defaults.logging.env),
                level: text(ENV_LOG_LEVEL, &defaults.logging.level),
            },
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AmqpError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AmqpError::ConfigError(format!("`{key}` has an invalid value `{raw}`"))),
    }
}
