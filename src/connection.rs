// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Handle
//!
//! The single owner of a broker connection. It hands publishers a non-owning
//! reference to its send channel, keeps track of the consumers that depend on
//! the connection and performs a bounded, coordinated shutdown:
//!
//! 1. The handle moves to `Closing` and revokes the send channel.
//! 2. Every registered consumer is closed concurrently, each bounded by its
//!    own timeout. A consumer that misses the deadline is abandoned.
//! 3. The connection is released and the handle moves to `Closed`.

use crate::{
    amqp::AmqpConnection,
    broker::{BrokerChannel, BrokerConnection, ConsumerHandle},
    config::{RabbitMQConfigs, ShutdownConfigs},
    errors::AmqpError,
};
use futures_util::future::join_all;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Lifecycle of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Open,
    Closing,
    Closed,
}

struct Inner {
    state: LifecycleState,
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
    consumers: Vec<Arc<dyn ConsumerHandle>>,
}

/// Exclusive owner of one logical broker connection.
pub struct ConnectionHandle {
    inner: Mutex<Inner>,
    consumer_close_timeout: Duration,
}

impl ConnectionHandle {
    /// Connects to RabbitMQ and opens the confirm-mode send channel.
    ///
    /// # Parameters
    /// * `cfg` - Broker connection settings
    /// * `shutdown` - Per-consumer close timeout used by `close`
    ///
    /// # Returns
    /// An open handle or the connection/channel error
    pub async fn open(
        cfg: &RabbitMQConfigs,
        shutdown: &ShutdownConfigs,
    ) -> Result<ConnectionHandle, AmqpError> {
        let connection = AmqpConnection::connect(cfg).await?;
        let handle =
            ConnectionHandle::with_connection(Box::new(connection), shutdown.consumer_close_timeout())
                .await?;

        info!(host = %cfg.host, vhost = %cfg.vhost, "RabbitMQ connection established");
        Ok(handle)
    }

    /// Takes ownership of an already established connection.
    ///
    /// If the send channel cannot be opened the connection is released before
    /// the error is returned.
    pub async fn with_connection(
        connection: Box<dyn BrokerConnection>,
        consumer_close_timeout: Duration,
    ) -> Result<ConnectionHandle, AmqpError> {
        let channel = match connection.create_channel().await {
            Ok(c) => c,
            Err(err) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = close_err.to_string(), "failure to release the connection");
                }
                return Err(err);
            }
        };

        Ok(ConnectionHandle {
            inner: Mutex::new(Inner {
                state: LifecycleState::Open,
                connection: Some(connection),
                channel: Some(channel),
                consumers: vec![],
            }),
            consumer_close_timeout,
        })
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state
    }

    /// Non-owning reference to the send channel.
    ///
    /// The reference stops upgrading as soon as the handle begins closing.
    pub async fn channel(&self) -> Result<Weak<dyn BrokerChannel>, AmqpError> {
        let inner = self.inner.lock().await;
        match (&inner.state, &inner.channel) {
            (LifecycleState::Open, Some(channel)) => Ok(Arc::downgrade(channel)),
            _ => Err(AmqpError::ConnectionClosed),
        }
    }

    /// Registers a consumer to be drained by `close`.
    pub async fn register_consumer(
        &self,
        consumer: Arc<dyn ConsumerHandle>,
    ) -> Result<(), AmqpError> {
        let mut inner = self.inner.lock().await;
        if inner.state != LifecycleState::Open {
            return Err(AmqpError::ConnectionClosed);
        }

        inner.consumers.push(consumer);
        Ok(())
    }

    /// Shuts the connection down.
    ///
    /// Runs at most once; later calls return `AmqpError::AlreadyClosed`.
    /// Shutdown time is bounded by the consumer close timeout plus the time
    /// the broker takes to close the connection.
    ///
    /// The returned future must be driven to completion: dropped midway, it
    /// leaves the handle in `Closing` and the connection is dropped without
    /// a broker-side close.
    ///
    /// # Returns
    /// Ok(()) or the error reported while releasing the connection
    pub async fn close(&self) -> Result<(), AmqpError> {
        let (connection, consumers) = {
            let mut inner = self.inner.lock().await;
            if inner.state != LifecycleState::Open {
                return Err(AmqpError::AlreadyClosed);
            }

            inner.state = LifecycleState::Closing;
            inner.channel = None;
            (inner.connection.take(), std::mem::take(&mut inner.consumers))
        };

        let total = consumers.len();
        drain_consumers(consumers, self.consumer_close_timeout).await;

        let result = match connection {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };

        self.inner.lock().await.state = LifecycleState::Closed;
        info!(consumers = total, "RabbitMQ connection, publisher, consumers closed");

        result
    }
}

/// Closes every consumer concurrently, each bounded by `timeout`.
///
/// Each close runs on its own task: a consumer that overruns is detached and
/// left to finish on its own, and a panicking close stays inside its task.
async fn drain_consumers(consumers: Vec<Arc<dyn ConsumerHandle>>, timeout: Duration) {
    let closing = consumers.into_iter().map(|consumer| async move {
        let tag = consumer.tag();
        let task = tokio::spawn(async move { consumer.close().await });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => {
                warn!(error = err.to_string(), tag = %tag, "failure to close consumer")
            }
            Ok(Err(err)) => error!(error = err.to_string(), tag = %tag, "consumer close task failed"),
            Err(_) => warn!(tag = %tag, ?timeout, "consumer close timed out, abandoning"),
        }
    });

    join_all(closing).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerChannel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Default)]
    struct FakeConnection {
        closes: Arc<AtomicUsize>,
        fail_channel: bool,
    }

    #[async_trait]
    impl BrokerConnection for FakeConnection {
        async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
            if self.fail_channel {
                return Err(AmqpError::ChannelError("refused".to_owned()));
            }
            Ok(Arc::new(MockBrokerChannel::new()))
        }

        async fn close(&self) -> Result<(), AmqpError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    enum Behavior {
        Sleep(Duration),
        Hang,
        Panic,
    }

    struct FakeConsumer {
        tag: &'static str,
        behavior: Behavior,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConsumerHandle for FakeConsumer {
        fn tag(&self) -> String {
            self.tag.to_owned()
        }

        async fn close(&self) -> Result<(), AmqpError> {
            match self.behavior {
                Behavior::Sleep(d) => tokio::time::sleep(d).await,
                Behavior::Hang => std::future::pending::<()>().await,
                Behavior::Panic => panic!("consumer blew up"),
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn handle(closes: Arc<AtomicUsize>, timeout: Duration) -> ConnectionHandle {
        let conn = FakeConnection {
            closes,
            fail_channel: false,
        };
        ConnectionHandle::with_connection(Box::new(conn), timeout)
            .await
            .unwrap()
    }

    fn consumer(tag: &'static str, behavior: Behavior, closed: &Arc<AtomicUsize>) -> Arc<FakeConsumer> {
        Arc::new(FakeConsumer {
            tag,
            behavior,
            closed: closed.clone(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn should_close_consumers_concurrently() {
        let closes = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let handle = handle(closes.clone(), Duration::from_secs(5)).await;

        for tag in ["a", "b", "c"] {
            let c = consumer(tag, Behavior::Sleep(Duration::from_millis(200)), &closed);
            handle.register_consumer(c).await.unwrap();
        }

        let started = Instant::now();
        handle.close().await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(closed.load(Ordering::SeqCst), 3);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state().await, LifecycleState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn should_abandon_hanging_consumer() {
        let closes = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let handle = handle(closes.clone(), Duration::from_millis(100)).await;

        handle
            .register_consumer(consumer("stuck", Behavior::Hang, &closed))
            .await
            .unwrap();
        handle
            .register_consumer(consumer("quick", Behavior::Sleep(Duration::from_millis(10)), &closed))
            .await
            .unwrap();

        let started = Instant::now();
        handle.close().await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_contain_panicking_consumer() {
        let closes = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let handle = handle(closes.clone(), Duration::from_secs(1)).await;

        handle
            .register_consumer(consumer("boom", Behavior::Panic, &closed))
            .await
            .unwrap();

        handle.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_close_only_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = handle(closes.clone(), Duration::from_secs(1)).await;

        handle.close().await.unwrap();

        assert_eq!(handle.close().await, Err(AmqpError::AlreadyClosed));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_revoke_channel_on_close() {
        let handle = handle(Arc::new(AtomicUsize::new(0)), Duration::from_secs(1)).await;
        let closed = Arc::new(AtomicUsize::new(0));

        let weak = handle.channel().await.unwrap();
        assert!(weak.upgrade().is_some());

        handle.close().await.unwrap();

        assert!(weak.upgrade().is_none());
        assert_eq!(handle.channel().await.err(), Some(AmqpError::ConnectionClosed));
        assert_eq!(
            handle
                .register_consumer(consumer("late", Behavior::Hang, &closed))
                .await,
            Err(AmqpError::ConnectionClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_stay_closing_when_close_is_abandoned() {
        let closes = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let handle = handle(closes.clone(), Duration::from_secs(60)).await;
        handle
            .register_consumer(consumer("slow", Behavior::Hang, &closed))
            .await
            .unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), handle.close()).await;

        assert!(abandoned.is_err());
        assert_eq!(handle.state().await, LifecycleState::Closing);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(handle.close().await, Err(AmqpError::AlreadyClosed));
    }

    #[tokio::test]
    async fn should_release_connection_when_channel_fails() {
        let closes = Arc::new(AtomicUsize::new(0));
        let conn = FakeConnection {
            closes: closes.clone(),
            fail_channel: true,
        };

        let result = ConnectionHandle::with_connection(Box::new(conn), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(AmqpError::ChannelError(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
