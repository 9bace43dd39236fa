// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Redis list used as a queue.
//!
//! Producers `LPUSH`, the consumer `BRPOP`s from the other end with the poll
//! timeout. Popping is destructive, so `Ack` and `NackDrop` are no-ops and
//! `NackRequeue` pushes the envelope back onto the pop end.

use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, ConnectionInfo, IntoConnectionInfo, RedisError, RedisResult};
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{BackendParts, ReceiverFactory};
use crate::config::{BackendConfig, Credentials};
use crate::error::{ConnectionError, FaultKind, TransportFault};
use crate::supervisor::{ConnectionSupervisor, Connector, LostSignal};
use crate::transport::{Acknowledger, Delivery, Publisher, Receiver};
use crate::types::{BackendKind, DeliveryOutcome, Role};

/// Map a client error onto the core's fault classes.
pub fn classify_redis_error(err: &RedisError) -> FaultKind {
    if err.is_timeout() {
        FaultKind::Transient
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        FaultKind::Fatal
    } else if err.kind() == ::redis::ErrorKind::AuthenticationFailed {
        FaultKind::Fatal
    } else {
        FaultKind::Transient
    }
}

fn fault(err: &RedisError) -> TransportFault {
    TransportFault::new(BackendKind::Redis, classify_redis_error(err), err.to_string())
}

pub struct RedisConnector {
    url: String,
    credentials: Option<Credentials>,
}

impl RedisConnector {
    pub fn new(url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            url: url.into(),
            credentials,
        }
    }

    fn connection_info(&self) -> RedisResult<ConnectionInfo> {
        let mut info = self.url.as_str().into_connection_info()?;
        if let Some(credentials) = &self.credentials {
            info.redis.username = Some(credentials.username.clone());
            info.redis.password = Some(credentials.password.clone());
        }
        Ok(info)
    }
}

pub struct RedisChannel {
    connection: MultiplexedConnection,
}

#[async_trait]
impl Connector for RedisConnector {
    type Channel = RedisChannel;

    fn backend(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn connect(&self, _lost: LostSignal) -> Result<RedisChannel, TransportFault> {
        let info = self.connection_info().map_err(|e| fault(&e))?;
        let client = Client::open(info).map_err(|e| fault(&e))?;
        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| fault(&e))?;

        let pong: RedisResult<String> = ::redis::cmd("PING").query_async(&mut connection).await;
        pong.map_err(|e| fault(&e))?;

        Ok(RedisChannel { connection })
    }

    async fn close(&self, _channel: &RedisChannel) {
        // Dropping the last clone of a multiplexed connection closes it.
        tracing::debug!(url = %self.url, "Releasing redis connection");
    }
}

/// Longest single `BRPOP`; cancellation is checked between calls.
const BRPOP_SLICE: Duration = Duration::from_millis(250);
/// Shorter blocks are not worth a round trip. `BRPOP 0` blocks forever.
const MIN_BLOCK: Duration = Duration::from_millis(10);

/// Block time for the next `BRPOP` with `remaining` left of the poll
/// timeout, or `None` when the poll is over.
fn next_block(remaining: Duration) -> Option<Duration> {
    (remaining >= MIN_BLOCK).then(|| remaining.min(BRPOP_SLICE))
}

async fn push(
    mut connection: MultiplexedConnection,
    command: &str,
    queue: String,
    envelope: Vec<u8>,
) -> Result<(), TransportFault> {
    let pushed: RedisResult<i64> = ::redis::cmd(command)
        .arg(&queue)
        .arg(envelope)
        .query_async(&mut connection)
        .await;
    pushed.map(|_| ()).map_err(|e| fault(&e))
}

pub struct RedisPublisher {
    supervisor: Arc<ConnectionSupervisor<RedisConnector>>,
    queue: String,
}

#[async_trait]
impl Publisher for RedisPublisher {
    fn backend(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn publish(
        &self,
        envelope: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Duration, ConnectionError> {
        let queue = self.queue.clone();
        self.supervisor
            .with_channel(cancel, move |channel| async move {
                let started = Instant::now();
                push(channel.connection.clone(), "LPUSH", queue, envelope).await?;
                Ok(started.elapsed())
            })
            .await
    }

    async fn close(&self) {
        self.supervisor.close().await;
    }
}

pub struct RedisReceiver {
    supervisor: Arc<ConnectionSupervisor<RedisConnector>>,
    queue: String,
    poll_timeout: Duration,
    generation: u64,
}

impl RedisReceiver {
    /// `BRPOP` in short slices until something arrives, the poll timeout
    /// passes or `cancel` fires. A slice is never abandoned mid-command, so
    /// a popped envelope is always handed out.
    async fn pop(
        &self,
        mut connection: MultiplexedConnection,
        cancel: &CancellationToken,
    ) -> RedisResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + self.poll_timeout;
        let mut block = self.poll_timeout.clamp(MIN_BLOCK, BRPOP_SLICE);

        loop {
            let popped: Option<(String, Vec<u8>)> = ::redis::cmd("BRPOP")
                .arg(&self.queue)
                .arg(block.as_secs_f64())
                .query_async(&mut connection)
                .await?;
            if let Some((_, envelope)) = popped {
                return Ok(Some(envelope));
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match next_block(deadline.saturating_duration_since(Instant::now())) {
                Some(next) => block = next,
                None => return Ok(None),
            }
        }
    }
}

#[async_trait]
impl Receiver for RedisReceiver {
    fn backend(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, ConnectionError> {
        let channel = self.supervisor.acquire(cancel).await?;
        self.generation = channel.generation();
        if cancel.is_cancelled() {
            return Ok(None);
        }

        match self.pop(channel.connection.clone(), cancel).await {
            Ok(None) => Ok(None),
            Ok(Some(envelope)) => {
                let acker = RedisAcker {
                    supervisor: Arc::clone(&self.supervisor),
                    generation: self.generation,
                    cancel: cancel.clone(),
                    queue: self.queue.clone(),
                    envelope: envelope.clone(),
                };
                Ok(Some(Delivery::new(envelope, Box::new(acker))))
            }
            Err(e) => {
                let fault = fault(&e);
                if fault.is_fatal() {
                    self.supervisor
                        .invalidate(self.generation, &fault.message)
                        .await;
                }
                Err(fault.into())
            }
        }
    }

    /// The envelope left the list on `BRPOP`.
    fn redelivers_unsettled(&self) -> bool {
        false
    }

    async fn reset(&mut self, reason: &str) {
        self.supervisor.invalidate(self.generation, reason).await;
    }

    async fn rearm(&mut self) {
        self.supervisor.reset().await;
    }

    async fn close(&mut self) {
        self.supervisor.close().await;
    }
}

struct RedisAcker {
    supervisor: Arc<ConnectionSupervisor<RedisConnector>>,
    generation: u64,
    cancel: CancellationToken,
    queue: String,
    envelope: Vec<u8>,
}

#[async_trait]
impl Acknowledger for RedisAcker {
    /// `NackRequeue` pushes the envelope back on the connection it came from
    /// and reconnects when that one is gone, since nothing else holds the
    /// message any more.
    async fn settle(self: Box<Self>, outcome: DeliveryOutcome) -> Result<(), ConnectionError> {
        if outcome != DeliveryOutcome::NackRequeue {
            return Ok(());
        }

        let RedisAcker {
            supervisor,
            generation,
            cancel,
            queue,
            envelope,
        } = *self;
        let current = supervisor
            .with_current_channel(generation, |channel| {
                push(
                    channel.connection.clone(),
                    "RPUSH",
                    queue.clone(),
                    envelope.clone(),
                )
            })
            .await;
        match current {
            Err(ConnectionError::ChannelClosed { .. }) => {
                supervisor
                    .with_channel(&cancel, move |channel| {
                        push(channel.connection.clone(), "RPUSH", queue, envelope)
                    })
                    .await
            }
            other => other,
        }
    }
}

/// Independent supervisors per role: a blocking BRPOP must never hold up
/// publishes on the same connection.
pub fn build(config: &BackendConfig) -> BackendParts {
    let connector = || RedisConnector::new(config.primary_endpoint(), config.credentials.clone());
    let producer = Arc::new(ConnectionSupervisor::new(connector(), config.retry));
    let consumer = Arc::new(ConnectionSupervisor::new(connector(), config.retry));

    let states = vec![
        (Role::Producer, producer.subscribe()),
        (Role::Consumer, consumer.subscribe()),
    ];

    let queue = config.destination.clone();
    let poll_timeout = config.poll_timeout;
    let receivers: ReceiverFactory = {
        let queue = queue.clone();
        Arc::new(move || {
            Box::new(RedisReceiver {
                supervisor: Arc::clone(&consumer),
                queue: queue.clone(),
                poll_timeout,
                generation: 0,
            }) as Box<dyn Receiver>
        })
    };

    BackendParts {
        publisher: Arc::new(RedisPublisher {
            supervisor: producer,
            queue,
        }),
        receivers,
        states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MaxAttempts, RetryPolicy};

    fn unreachable_supervisor() -> Arc<ConnectionSupervisor<RedisConnector>> {
        let policy = RetryPolicy::new(
            MaxAttempts::Bounded(1),
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
        .unwrap();
        Arc::new(ConnectionSupervisor::new(
            RedisConnector::new("redis://127.0.0.1:1", None),
            policy,
        ))
    }

    fn acker(supervisor: Arc<ConnectionSupervisor<RedisConnector>>) -> Box<RedisAcker> {
        Box::new(RedisAcker {
            supervisor,
            generation: 3,
            cancel: CancellationToken::new(),
            queue: "message_queue".to_string(),
            envelope: b"abc:x".to_vec(),
        })
    }

    #[test]
    fn test_brpop_slices() {
        assert_eq!(next_block(Duration::from_secs(5)), Some(BRPOP_SLICE));
        assert_eq!(
            next_block(Duration::from_millis(120)),
            Some(Duration::from_millis(120))
        );
        assert_eq!(next_block(MIN_BLOCK), Some(MIN_BLOCK));
        assert_eq!(next_block(Duration::from_millis(3)), None);
        assert_eq!(next_block(Duration::ZERO), None);
    }

    #[tokio::test]
    async fn test_requeue_on_lost_channel_reconnects() {
        let err = acker(unreachable_supervisor())
            .settle(DeliveryOutcome::NackRequeue)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConnectionError::Exhausted { attempts: 1, .. }),
            "unexpected error: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_ack_and_drop_need_no_connection() {
        let supervisor = unreachable_supervisor();
        acker(Arc::clone(&supervisor))
            .settle(DeliveryOutcome::Ack)
            .await
            .unwrap();
        acker(supervisor)
            .settle(DeliveryOutcome::NackDrop)
            .await
            .unwrap();
    }

    #[test]
    fn test_classify_io_errors_as_fatal() {
        let refused = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(classify_redis_error(&refused), FaultKind::Fatal);

        let reset = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(classify_redis_error(&reset), FaultKind::Fatal);
    }

    #[test]
    fn test_classify_timeouts_and_replies_as_transient() {
        let timeout = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        ));
        assert_eq!(classify_redis_error(&timeout), FaultKind::Transient);

        let busy = RedisError::from((::redis::ErrorKind::BusyLoadingError, "loading"));
        assert_eq!(classify_redis_error(&busy), FaultKind::Transient);
    }

    #[test]
    fn test_credentials_applied_to_connection_info() {
        let connector = RedisConnector::new(
            "redis://localhost:6379",
            Some(Credentials {
                username: "bench".to_string(),
                password: "secret".to_string(),
            }),
        );
        let info = connector.connection_info().unwrap();
        assert_eq!(info.redis.username.as_deref(), Some("bench"));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
    }
}
