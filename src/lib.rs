// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Reliable publishing to RabbitMQ.
//!
//! ```ignore
//! let cfg = Configs::from_env()?;
//! let handle = ConnectionHandle::open(&cfg.rabbitmq, &cfg.shutdown).await?;
//!
//! let binding = ExchangeBinding::new("sync_database").topic().routing_key("sync.user");
//! let mut publisher =
//!     ReliablePublisher::new(&handle, binding, RetryPolicy::try_from(&cfg.publisher)?).await?;
//! if let Some(route) = cfg.publisher.dead_letter_route() {
//!     publisher = publisher.with_dead_letter(route);
//! }
//!
//! let outcome = publisher
//!     .safety_publish(&Context::current(), &Message::new("req-1", b"{}"))
//!     .await;
//!
//! handle.close().await?;
//! ```

mod otel;

pub mod amqp;
pub mod broker;
pub mod config;
pub mod connection;
pub mod errors;
pub mod exchange;
pub mod headers;
pub mod logging;
pub mod message;
pub mod outcome;
pub mod publisher;
pub mod retry;
