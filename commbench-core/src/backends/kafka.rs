// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Kafka topic via rdkafka.
//!
//! Connect includes a readiness probe: a metadata fetch that must report at
//! least one broker. Offsets are auto-committed but only after the consumer
//! stores them, so an unsettled delivery is never committed. `NackRequeue`
//! seeks the partition back to the delivery's offset.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::Offset;
use tokio_util::sync::CancellationToken;

use super::{BackendParts, ReceiverFactory};
use crate::config::{BackendConfig, Credentials};
use crate::error::{ConnectionError, FaultKind, TransportFault};
use crate::supervisor::{ConnectionSupervisor, Connector, LostSignal};
use crate::transport::{Acknowledger, Delivery, Publisher, Receiver};
use crate::types::{BackendKind, DeliveryOutcome, Role};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Map a client error onto the core's fault classes.
pub fn classify_kafka_error(err: &KafkaError) -> FaultKind {
    if let Some(code) = err.rdkafka_error_code() {
        if matches!(
            code,
            RDKafkaErrorCode::Fatal
                | RDKafkaErrorCode::InvalidGroupId
                | RDKafkaErrorCode::GroupAuthorizationFailed
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::AllBrokersDown
        ) {
            return FaultKind::Fatal;
        }
    }

    match err {
        KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => FaultKind::Fatal,
        _ => FaultKind::Transient,
    }
}

fn fault(err: &KafkaError) -> TransportFault {
    TransportFault::new(BackendKind::Kafka, classify_kafka_error(err), err.to_string())
}

fn join_fault(err: tokio::task::JoinError) -> TransportFault {
    TransportFault::transient(BackendKind::Kafka, format!("probe task failed: {}", err))
}

#[derive(Clone)]
struct KafkaSettings {
    bootstrap_servers: String,
    credentials: Option<Credentials>,
    topic: String,
    group_id: String,
}

impl KafkaSettings {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("socket.timeout.ms", "60000")
            .set("metadata.max.age.ms", "180000")
            .set("topic.metadata.refresh.interval.ms", "10000");
        if let Some(credentials) = &self.credentials {
            config
                .set("security.protocol", "SASL_PLAINTEXT")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", &credentials.username)
                .set("sasl.password", &credentials.password);
        }
        config
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", "45000");
        config
    }
}

/// Fetch cluster metadata on a blocking thread and require at least one broker.
async fn probe_brokers(settings: &KafkaSettings) -> Result<(), TransportFault> {
    let config = settings.client_config();
    let brokers = tokio::task::spawn_blocking(move || -> Result<usize, KafkaError> {
        let probe: BaseConsumer = config.create()?;
        let metadata = probe.fetch_metadata(None, METADATA_TIMEOUT)?;
        Ok(metadata.brokers().len())
    })
    .await
    .map_err(join_fault)?
    .map_err(|e| fault(&e))?;

    if brokers == 0 {
        return Err(TransportFault::transient(
            BackendKind::Kafka,
            "metadata retrieved but no brokers found",
        ));
    }
    tracing::debug!(brokers, servers = %settings.bootstrap_servers, "Kafka cluster reachable");
    Ok(())
}

pub struct KafkaProducerConnector {
    settings: KafkaSettings,
}

#[async_trait]
impl Connector for KafkaProducerConnector {
    type Channel = FutureProducer;

    fn backend(&self) -> BackendKind {
        BackendKind::Kafka
    }

    async fn connect(&self, _lost: LostSignal) -> Result<FutureProducer, TransportFault> {
        probe_brokers(&self.settings).await?;
        self.settings
            .client_config()
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| fault(&e))
    }

    async fn close(&self, producer: &FutureProducer) {
        let producer = producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(SEND_TIMEOUT)).await;
        if let Ok(Err(e)) = flushed {
            tracing::debug!(error = %e, "Producer flush failed");
        }
    }
}

pub struct KafkaConsumerChannel {
    consumer: StreamConsumer,
}

pub struct KafkaConsumerConnector {
    settings: KafkaSettings,
}

#[async_trait]
impl Connector for KafkaConsumerConnector {
    type Channel = KafkaConsumerChannel;

    fn backend(&self) -> BackendKind {
        BackendKind::Kafka
    }

    async fn connect(&self, _lost: LostSignal) -> Result<KafkaConsumerChannel, TransportFault> {
        probe_brokers(&self.settings).await?;
        let consumer: StreamConsumer = self
            .settings
            .consumer_config()
            .create()
            .map_err(|e| fault(&e))?;
        consumer
            .subscribe(&[self.settings.topic.as_str()])
            .map_err(|e| fault(&e))?;

        tracing::info!(topic = %self.settings.topic, group = %self.settings.group_id, "Subscribed to topic");
        Ok(KafkaConsumerChannel { consumer })
    }

    async fn close(&self, channel: &KafkaConsumerChannel) {
        channel.consumer.unsubscribe();
    }
}

pub struct KafkaPublisher {
    supervisor: Arc<ConnectionSupervisor<KafkaProducerConnector>>,
    topic: String,
}

#[async_trait]
impl Publisher for KafkaPublisher {
    fn backend(&self) -> BackendKind {
        BackendKind::Kafka
    }

    async fn publish(
        &self,
        envelope: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Duration, ConnectionError> {
        let topic = self.topic.clone();
        self.supervisor
            .with_channel(cancel, move |producer| async move {
                let started = Instant::now();
                let record = FutureRecord::<(), [u8]>::to(&topic).payload(envelope.as_slice());
                producer
                    .send(record, SEND_TIMEOUT)
                    .await
                    .map(|_| started.elapsed())
                    .map_err(|(e, _)| fault(&e))
            })
            .await
    }

    async fn close(&self) {
        self.supervisor.close().await;
    }
}

pub struct KafkaReceiver {
    supervisor: Arc<ConnectionSupervisor<KafkaConsumerConnector>>,
    poll_timeout: Duration,
    generation: u64,
}

#[async_trait]
impl Receiver for KafkaReceiver {
    fn backend(&self) -> BackendKind {
        BackendKind::Kafka
    }

    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, ConnectionError> {
        let channel = self.supervisor.acquire(cancel).await?;
        self.generation = channel.generation();

        let received = tokio::select! {
            received = tokio::time::timeout(self.poll_timeout, channel.consumer.recv()) => received,
            _ = cancel.cancelled() => return Ok(None),
        };

        let message = match received {
            Err(_) => return Ok(None),
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                let fault = fault(&e);
                if fault.is_fatal() {
                    self.supervisor
                        .invalidate(self.generation, &fault.message)
                        .await;
                }
                return Err(fault.into());
            }
        };

        let envelope = message.payload().unwrap_or_default().to_vec();
        let acker = KafkaAcker {
            supervisor: Arc::clone(&self.supervisor),
            generation: self.generation,
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        };
        Ok(Some(Delivery::new(envelope, Box::new(acker))))
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

struct KafkaAcker {
    supervisor: Arc<ConnectionSupervisor<KafkaConsumerConnector>>,
    generation: u64,
    topic: String,
    partition: i32,
    offset: i64,
}

#[async_trait]
impl Acknowledger for KafkaAcker {
    async fn settle(self: Box<Self>, outcome: DeliveryOutcome) -> Result<(), ConnectionError> {
        let KafkaAcker {
            supervisor,
            generation,
            topic,
            partition,
            offset,
        } = *self;

        supervisor
            .with_current_channel(generation, move |channel| async move {
                let settled = match outcome {
                    // The stored offset is the next one to read.
                    DeliveryOutcome::Ack | DeliveryOutcome::NackDrop => {
                        channel.consumer.store_offset(&topic, partition, offset + 1)
                    }
                    DeliveryOutcome::NackRequeue => channel.consumer.seek(
                        &topic,
                        partition,
                        Offset::Offset(offset),
                        SEEK_TIMEOUT,
                    ),
                };
                settled.map_err(|e| fault(&e))
            })
            .await
    }
}

/// Independent supervisors per role.
pub fn build(config: &BackendConfig) -> BackendParts {
    let settings = KafkaSettings {
        bootstrap_servers: config.endpoints.join(","),
        credentials: config.credentials.clone(),
        topic: config.destination.clone(),
        group_id: config
            .group_id
            .clone()
            .unwrap_or_else(|| "commbench".to_string()),
    };

    let producer = Arc::new(ConnectionSupervisor::new(
        KafkaProducerConnector {
            settings: settings.clone(),
        },
        config.retry,
    ));
    let consumer = Arc::new(ConnectionSupervisor::new(
        KafkaConsumerConnector { settings },
        config.retry,
    ));

    let states = vec![
        (Role::Producer, producer.subscribe()),
        (Role::Consumer, consumer.subscribe()),
    ];

    let poll_timeout = config.poll_timeout;
    let receivers: ReceiverFactory = Arc::new(move || {
        Box::new(KafkaReceiver {
            supervisor: Arc::clone(&consumer),
            poll_timeout,
            generation: 0,
        }) as Box<dyn Receiver>
    });

    BackendParts {
        publisher: Arc::new(KafkaPublisher {
            supervisor: producer,
            topic: config.destination.clone(),
        }),
        receivers,
        states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_fatal_errors() {
        assert_eq!(
            classify_kafka_error(&KafkaError::ClientCreation("bad config".to_string())),
            FaultKind::Fatal
        );
        assert_eq!(
            classify_kafka_error(&KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown)),
            FaultKind::Fatal
        );
        assert_eq!(
            classify_kafka_error(&KafkaError::MessageConsumption(RDKafkaErrorCode::InvalidGroupId)),
            FaultKind::Fatal
        );
    }

    #[test]
    fn test_classify_transient_errors() {
        assert_eq!(
            classify_kafka_error(&KafkaError::MessageConsumption(RDKafkaErrorCode::RequestTimedOut)),
            FaultKind::Transient
        );
    }

    #[test]
    fn test_consumer_config_stores_offsets_explicitly() {
        let settings = KafkaSettings {
            bootstrap_servers: "localhost:9092".to_string(),
            credentials: None,
            topic: "commbench".to_string(),
            group_id: "bench".to_string(),
        };
        let config = settings.consumer_config();
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("group.id"), Some("bench"));
        assert_eq!(config.get("sasl.username"), None);
    }
}
