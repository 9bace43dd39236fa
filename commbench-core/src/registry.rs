// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thread-safe backend registry using DashMap.
//!
//! The facade the CLI and harness talk to: `produce` on any registered
//! backend and at most one running consumer per backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backends::{self, BackendParts, ReceiverFactory};
use crate::clock::{Clock, SystemClock};
use crate::codec::{DelimitedCodec, MessageCodec};
use crate::config::{BackendConfig, Config};
use crate::consumer::{Consumer, ConsumerSettings, ConsumerStats, MessageHandler};
use crate::error::{CommbenchError, CommbenchResult, ConnectionError};
use crate::metrics::MetricsSink;
use crate::producer::{Producer, DEFAULT_RECORD_TTL};
use crate::state::ConnectionState;
use crate::store::TimestampStore;
use crate::types::{BackendKind, MessageId, Role};

/// Settings shared by every producer and consumer the registry creates.
#[derive(Clone)]
pub struct RegistryOptions {
    pub record_ttl: Option<Duration>,
    pub message_type: String,
    pub clock: Arc<dyn Clock>,
    pub codec: Arc<dyn MessageCodec>,
}

impl RegistryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            record_ttl: config.store.record_ttl,
            message_type: config.metrics.message_type.clone(),
            ..Self::default()
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            record_ttl: Some(DEFAULT_RECORD_TTL),
            message_type: "default".to_string(),
            clock: Arc::new(SystemClock),
            codec: Arc::new(DelimitedCodec),
        }
    }
}

/// Entry in the backend registry.
struct BackendEntry {
    config: BackendConfig,
    producer: Arc<Producer>,
    receivers: ReceiverFactory,
    states: Vec<(Role, watch::Receiver<ConnectionState>)>,
}

/// Handle to a consumer loop started by [`BackendRegistry::start_consumer`].
pub struct ConsumerHandle {
    backend: BackendKind,
    cancel: CancellationToken,
    task: JoinHandle<Result<ConsumerStats, ConnectionError>>,
}

impl ConsumerHandle {
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Ask the loop to stop. Returns immediately; use [`join`](Self::join)
    /// to wait.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end.
    pub async fn join(self) -> CommbenchResult<ConsumerStats> {
        match self.task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(CommbenchError::ConsumerTask {
                backend: self.backend,
                message: e.to_string(),
            }),
        }
    }
}

/// Thread-safe registry of configured backends.
pub struct BackendRegistry {
    backends: DashMap<BackendKind, BackendEntry>,
    /// Running consumer per backend, tagged so a finished task only removes
    /// its own slot.
    consumers: Arc<DashMap<BackendKind, u64>>,
    next_consumer: AtomicU64,
    store: Arc<dyn TimestampStore>,
    sink: Arc<dyn MetricsSink>,
    options: RegistryOptions,
    root: CancellationToken,
}

impl BackendRegistry {
    pub fn new(
        store: Arc<dyn TimestampStore>,
        sink: Arc<dyn MetricsSink>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            backends: DashMap::new(),
            consumers: Arc::new(DashMap::new()),
            next_consumer: AtomicU64::new(1),
            store,
            sink,
            options,
            root: CancellationToken::new(),
        }
    }

    /// Register every enabled backend of a validated configuration.
    ///
    /// Nothing connects here; supervisors connect on first use.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn TimestampStore>,
        sink: Arc<dyn MetricsSink>,
    ) -> CommbenchResult<Self> {
        let registry = Self::new(store, sink, RegistryOptions::from_config(config));
        for backend in config.enabled_backends() {
            let parts = backends::build(backend)?;
            registry.register(backend.clone(), parts)?;
        }
        Ok(registry)
    }

    /// Register a backend built by the caller.
    /// Fails fast if the kind is already registered.
    pub fn register(&self, config: BackendConfig, parts: BackendParts) -> CommbenchResult<()> {
        let kind = config.kind;
        let entry = match self.backends.entry(kind) {
            Entry::Occupied(_) => return Err(CommbenchError::BackendAlreadyRegistered(kind)),
            Entry::Vacant(entry) => entry,
        };

        let producer = Producer::new(
            parts.publisher,
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
        )
        .with_clock(Arc::clone(&self.options.clock))
        .with_codec(Arc::clone(&self.options.codec))
        .with_record_ttl(self.options.record_ttl);

        tracing::info!(
            backend = %kind,
            destination = %config.destination,
            max_attempts = %config.retry.max_attempts,
            "Registered backend"
        );
        entry.insert(BackendEntry {
            config,
            producer: Arc::new(producer),
            receivers: parts.receivers,
            states: parts.states,
        });
        Ok(())
    }

    /// Produce one message on `kind`.
    pub async fn produce(
        &self,
        kind: BackendKind,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> CommbenchResult<MessageId> {
        // Clone out of the map so no shard lock is held across the await.
        let producer = self
            .backends
            .get(&kind)
            .map(|entry| Arc::clone(&entry.producer))
            .ok_or(CommbenchError::BackendNotConfigured(kind))?;
        Ok(producer.produce(payload, cancel).await?)
    }

    /// Spawn the consumer loop for `kind`.
    ///
    /// Refuses a second consumer while one is still running. The loop stops
    /// on [`ConsumerHandle::shutdown`] or [`shutdown_all`](Self::shutdown_all).
    pub fn start_consumer(
        &self,
        kind: BackendKind,
        handler: Arc<dyn MessageHandler>,
    ) -> CommbenchResult<ConsumerHandle> {
        let (receiver, settings) = {
            let entry = self
                .backends
                .get(&kind)
                .ok_or(CommbenchError::BackendNotConfigured(kind))?;
            (
                (entry.receivers)(),
                ConsumerSettings::for_backend(&entry.config, self.options.message_type.clone()),
            )
        };

        let consumer_id = match self.consumers.entry(kind) {
            Entry::Occupied(_) => return Err(CommbenchError::ConsumerAlreadyRunning(kind)),
            Entry::Vacant(slot) => {
                let id = self.next_consumer.fetch_add(1, Ordering::Relaxed);
                slot.insert(id);
                id
            }
        };

        let consumer = Consumer::new(receiver, Arc::clone(&self.store), Arc::clone(&self.sink))
            .with_clock(Arc::clone(&self.options.clock))
            .with_codec(Arc::clone(&self.options.codec))
            .with_handler(handler)
            .with_settings(settings);

        let cancel = self.root.child_token();
        let consumers = Arc::clone(&self.consumers);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let result = consumer.run(cancel).await;
                consumers.remove_if(&kind, |_, running| *running == consumer_id);
                result
            }
        });

        Ok(ConsumerHandle {
            backend: kind,
            cancel,
            task,
        })
    }

    pub fn is_consuming(&self, kind: BackendKind) -> bool {
        self.consumers.contains_key(&kind)
    }

    /// Cancel every consumer and close every publisher.
    pub async fn shutdown_all(&self) {
        self.root.cancel();

        let producers: Vec<Arc<Producer>> = self
            .backends
            .iter()
            .map(|entry| Arc::clone(&entry.producer))
            .collect();
        for producer in producers {
            producer.close().await;
        }
        tracing::info!(backends = self.backends.len(), "Registry shut down");
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Registered backends in declaration order of [`BackendKind::ALL`].
    pub fn backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.backends.contains_key(kind))
            .collect()
    }

    pub fn config(&self, kind: BackendKind) -> Option<BackendConfig> {
        self.backends.get(&kind).map(|entry| entry.config.clone())
    }

    /// Current connection state per backend and role.
    pub fn connection_states(&self) -> Vec<(BackendKind, Role, ConnectionState)> {
        self.backends()
            .into_iter()
            .filter_map(|kind| self.backends.get(&kind))
            .flat_map(|entry| {
                let kind = entry.config.kind;
                entry
                    .states
                    .iter()
                    .map(|(role, state)| (kind, *role, *state.borrow()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{memory, MemoryBroker};
    use crate::consumer::NoopHandler;
    use crate::metrics::RecordingSink;
    use crate::store::MemoryTimestampStore;

    fn registry() -> BackendRegistry {
        BackendRegistry::new(
            Arc::new(MemoryTimestampStore::new()),
            Arc::new(RecordingSink::new()),
            RegistryOptions::default(),
        )
    }

    fn memory_parts(config: &BackendConfig) -> BackendParts {
        memory::build(config, MemoryBroker::new(BackendKind::Memory))
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = registry();
        let config = BackendConfig::defaults(BackendKind::Memory);

        assert!(registry.register(config.clone(), memory_parts(&config)).is_ok());
        let err = registry
            .register(config.clone(), memory_parts(&config))
            .unwrap_err();
        assert!(matches!(err, CommbenchError::BackendAlreadyRegistered(BackendKind::Memory)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_backend() {
        let registry = registry();
        let err = registry
            .produce(BackendKind::Kafka, b"x", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommbenchError::BackendNotConfigured(BackendKind::Kafka)));
        assert!(registry
            .start_consumer(BackendKind::Kafka, Arc::new(NoopHandler))
            .is_err());
    }

    #[tokio::test]
    async fn test_second_consumer_refused_until_first_finishes() {
        let registry = registry();
        let config = BackendConfig::defaults(BackendKind::Memory);
        registry.register(config.clone(), memory_parts(&config)).unwrap();

        let first = registry
            .start_consumer(BackendKind::Memory, Arc::new(NoopHandler))
            .unwrap();
        assert!(registry.is_consuming(BackendKind::Memory));
        let err = registry
            .start_consumer(BackendKind::Memory, Arc::new(NoopHandler))
            .err()
            .unwrap();
        assert!(matches!(err, CommbenchError::ConsumerAlreadyRunning(BackendKind::Memory)));

        first.shutdown();
        first.join().await.unwrap();
        assert!(!registry.is_consuming(BackendKind::Memory));

        let second = registry
            .start_consumer(BackendKind::Memory, Arc::new(NoopHandler))
            .unwrap();
        second.shutdown();
        second.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consumer_started_from_spawned_task() {
        let registry = Arc::new(registry());
        let mut config = BackendConfig::defaults(BackendKind::Memory);
        config.poll_timeout = Duration::from_millis(20);
        let broker = MemoryBroker::new(BackendKind::Memory);
        registry
            .register(config.clone(), memory::build(&config, Arc::clone(&broker)))
            .unwrap();
        registry
            .produce(BackendKind::Memory, b"x", &CancellationToken::new())
            .await
            .unwrap();

        let handle = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.start_consumer(BackendKind::Memory, Arc::new(NoopHandler)) }
        })
        .await
        .unwrap()
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.depth() + broker.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown();
        let stats = handle.join().await.unwrap();
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn test_connection_states_start_disconnected() {
        let registry = registry();
        let config = BackendConfig::defaults(BackendKind::Memory);
        registry.register(config.clone(), memory_parts(&config)).unwrap();

        let states = registry.connection_states();
        assert_eq!(states.len(), 2);
        assert!(states
            .iter()
            .all(|(_, _, state)| *state == ConnectionState::Disconnected));
    }

    #[tokio::test]
    async fn test_concurrent_produce() {
        let registry = Arc::new(registry());
        let config = BackendConfig::defaults(BackendKind::Memory);
        registry.register(config.clone(), memory_parts(&config)).unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let reg = Arc::clone(&registry);
                tokio::spawn(async move {
                    reg.produce(BackendKind::Memory, b"x", &CancellationToken::new())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }
}
