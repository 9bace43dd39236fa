// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! AMQP 0-9-1 queue via lapin.
//!
//! One connection with one channel is shared by producer and consumer. The
//! queue is declared durable, the consumer acks manually with the configured
//! prefetch, and publishes are persistent with publisher confirms.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPUri, AMQPUserInfo};
use lapin::{acker::Acker, BasicProperties, Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BackendParts, ReceiverFactory};
use crate::config::{BackendConfig, Credentials};
use crate::error::{ConnectionError, FaultKind, TransportFault};
use crate::supervisor::{ConnectionSupervisor, Connector, LostSignal};
use crate::transport::{Acknowledger, Delivery, Publisher, Receiver};
use crate::types::{BackendKind, DeliveryOutcome, Role};

const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Map a client error onto the core's fault classes.
pub fn classify_amqp_error(err: &lapin::Error) -> FaultKind {
    match err {
        lapin::Error::IOError(_)
        | lapin::Error::InvalidChannel(_)
        | lapin::Error::InvalidChannelState(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::ProtocolError(_)
        | lapin::Error::MissingHeartbeatError => FaultKind::Fatal,
        _ => FaultKind::Transient,
    }
}

fn fault(err: &lapin::Error) -> TransportFault {
    TransportFault::new(BackendKind::RabbitMq, classify_amqp_error(err), err.to_string())
}

pub struct AmqpConnector {
    uri: String,
    credentials: Option<Credentials>,
    queue: String,
    prefetch: u16,
}

impl AmqpConnector {
    fn parse_uri(&self) -> Result<AMQPUri, TransportFault> {
        let mut uri = AMQPUri::from_str(&self.uri)
            .map_err(|e| TransportFault::fatal(BackendKind::RabbitMq, format!("invalid uri: {}", e)))?;
        if let Some(credentials) = &self.credentials {
            uri.authority.userinfo = AMQPUserInfo {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            };
        }
        Ok(uri)
    }
}

pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Connector for AmqpConnector {
    type Channel = AmqpChannel;

    fn backend(&self) -> BackendKind {
        BackendKind::RabbitMq
    }

    async fn connect(&self, lost: LostSignal) -> Result<AmqpChannel, TransportFault> {
        let uri = self.parse_uri()?;
        let connection = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .map_err(|e| fault(&e))?;
        connection.on_error(move |err| lost.notify(format!("connection error: {}", err)));

        let channel = connection.create_channel().await.map_err(|e| fault(&e))?;
        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| fault(&e))?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| fault(&e))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| fault(&e))?;

        tracing::debug!(queue = %self.queue, prefetch = self.prefetch, "Declared durable queue");
        Ok(AmqpChannel {
            connection,
            channel,
        })
    }

    async fn close(&self, channel: &AmqpChannel) {
        if let Err(e) = channel.channel.close(REPLY_SUCCESS, "closing").await {
            tracing::debug!(error = %e, "Channel close failed");
        }
        if let Err(e) = channel.connection.close(REPLY_SUCCESS, "closing").await {
            tracing::debug!(error = %e, "Connection close failed");
        }
    }
}

pub struct AmqpPublisher {
    supervisor: Arc<ConnectionSupervisor<AmqpConnector>>,
    queue: String,
}

#[async_trait]
impl Publisher for AmqpPublisher {
    fn backend(&self) -> BackendKind {
        BackendKind::RabbitMq
    }

    async fn publish(
        &self,
        envelope: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Duration, ConnectionError> {
        let queue = self.queue.clone();
        self.supervisor
            .with_channel(cancel, move |amqp| async move {
                let started = Instant::now();
                let confirmation = amqp
                    .channel
                    .basic_publish(
                        "",
                        &queue,
                        BasicPublishOptions::default(),
                        &envelope,
                        BasicProperties::default().with_delivery_mode(PERSISTENT),
                    )
                    .await
                    .map_err(|e| fault(&e))?
                    .await
                    .map_err(|e| fault(&e))?;

                if confirmation.is_nack() {
                    return Err(TransportFault::transient(
                        BackendKind::RabbitMq,
                        "broker nacked publish",
                    ));
                }
                Ok(started.elapsed())
            })
            .await
    }

    async fn close(&self) {
        self.supervisor.close().await;
    }
}

pub struct AmqpReceiver {
    supervisor: Arc<ConnectionSupervisor<AmqpConnector>>,
    queue: String,
    consumer_tag: String,
    poll_timeout: Duration,
    subscription: Option<(u64, lapin::Consumer)>,
}

impl AmqpReceiver {
    async fn subscribe(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(u64, lapin::Consumer), ConnectionError> {
        let queue = self.queue.clone();
        let tag = self.consumer_tag.clone();
        let subscription = self
            .supervisor
            .with_channel(cancel, move |amqp| async move {
                let consumer = amqp
                    .channel
                    .basic_consume(
                        &queue,
                        &tag,
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| fault(&e))?;
                Ok((amqp.generation(), consumer))
            })
            .await?;

        tracing::info!(queue = %self.queue, generation = subscription.0, "Subscribed to queue");
        Ok(subscription)
    }
}

#[async_trait]
impl Receiver for AmqpReceiver {
    fn backend(&self) -> BackendKind {
        BackendKind::RabbitMq
    }

    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, ConnectionError> {
        let lease = self.supervisor.acquire(cancel).await?;
        let stale = self
            .subscription
            .as_ref()
            .map_or(true, |(generation, _)| *generation != lease.generation());
        if stale {
            self.subscription = Some(self.subscribe(cancel).await?);
        }
        let Some((generation, consumer)) = self.subscription.as_mut() else {
            return Ok(None);
        };
        let generation = *generation;

        let next = tokio::select! {
            next = tokio::time::timeout(self.poll_timeout, consumer.next()) => next,
            _ = cancel.cancelled() => return Ok(None),
        };

        let fault = match next {
            // Poll timeout
            Err(_) => return Ok(None),
            Ok(Some(Ok(delivery))) => {
                let acker = AmqpAcker {
                    supervisor: Arc::clone(&self.supervisor),
                    generation,
                    acker: delivery.acker,
                };
                return Ok(Some(Delivery::new(delivery.data, Box::new(acker))));
            }
            Ok(Some(Err(e))) => fault(&e),
            Ok(None) => TransportFault::fatal(BackendKind::RabbitMq, "consumer stream closed"),
        };

        if fault.is_fatal() {
            self.subscription = None;
            self.supervisor.invalidate(generation, &fault.message).await;
        }
        Err(fault.into())
    }

    async fn reset(&mut self, reason: &str) {
        if let Some((generation, _)) = self.subscription.take() {
            self.supervisor.invalidate(generation, reason).await;
        }
    }

    async fn rearm(&mut self) {
        self.supervisor.reset().await;
    }

    async fn close(&mut self) {
        self.subscription = None;
        self.supervisor.close().await;
    }
}

struct AmqpAcker {
    supervisor: Arc<ConnectionSupervisor<AmqpConnector>>,
    generation: u64,
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn settle(self: Box<Self>, outcome: DeliveryOutcome) -> Result<(), ConnectionError> {
        let AmqpAcker {
            supervisor,
            generation,
            acker,
        } = *self;

        // Tags are only meaningful on the channel that delivered them.
        supervisor
            .with_current_channel(generation, move |_| async move {
                let settled = match outcome {
                    DeliveryOutcome::Ack => acker.ack(BasicAckOptions::default()).await,
                    DeliveryOutcome::NackRequeue => {
                        acker
                            .nack(BasicNackOptions {
                                requeue: true,
                                ..BasicNackOptions::default()
                            })
                            .await
                    }
                    DeliveryOutcome::NackDrop => {
                        acker
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..BasicNackOptions::default()
                            })
                            .await
                    }
                };
                settled.map(|_| ()).map_err(|e| fault(&e))
            })
            .await
    }
}

/// One supervisor shared by both roles: a single connection and channel.
pub fn build(config: &BackendConfig) -> BackendParts {
    let supervisor = Arc::new(ConnectionSupervisor::new(
        AmqpConnector {
            uri: config.primary_endpoint().to_string(),
            credentials: config.credentials.clone(),
            queue: config.destination.clone(),
            prefetch: config.prefetch,
        },
        config.retry,
    ));

    let states = vec![
        (Role::Producer, supervisor.subscribe()),
        (Role::Consumer, supervisor.subscribe()),
    ];

    let queue = config.destination.clone();
    let poll_timeout = config.poll_timeout;
    let receivers: ReceiverFactory = {
        let supervisor = Arc::clone(&supervisor);
        let queue = queue.clone();
        Arc::new(move || {
            Box::new(AmqpReceiver {
                supervisor: Arc::clone(&supervisor),
                queue: queue.clone(),
                consumer_tag: format!("commbench-{}", Uuid::new_v4()),
                poll_timeout,
                subscription: None,
            }) as Box<dyn Receiver>
        })
    };

    BackendParts {
        publisher: Arc::new(AmqpPublisher { supervisor, queue }),
        receivers,
        states,
    }
}
