// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-process broker with manual acknowledgement.
//!
//! Behaves like a single durable queue: deliveries stay unacked until
//! settled, and unacked deliveries go back to the head of the queue when
//! their connection dies. Failure controls let tests refuse connects, drop
//! every live connection, or reject publishes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{BackendParts, ReceiverFactory};
use crate::config::BackendConfig;
use crate::error::{ConnectionError, TransportFault};
use crate::supervisor::{ConnectionSupervisor, Connector, LostSignal};
use crate::transport::{Acknowledger, Delivery, Publisher, Receiver};
use crate::types::{BackendKind, DeliveryOutcome, Role};

struct Unacked {
    session: u64,
    envelope: Vec<u8>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Vec<u8>>,
    unacked: HashMap<u64, Unacked>,
    sessions: HashMap<u64, LostSignal>,
    next_tag: u64,
}

impl Queue {
    /// Put a session's unacked deliveries back at the head, oldest first.
    fn requeue_session(&mut self, session: u64) -> usize {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.session == session)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        for tag in tags.iter().rev() {
            if let Some(unacked) = self.unacked.remove(tag) {
                self.ready.push_front(unacked.envelope);
            }
        }
        tags.len()
    }
}

/// Shared in-process queue. Producer and consumer connectors built on the
/// same broker see the same messages.
pub struct MemoryBroker {
    label: BackendKind,
    queue: Mutex<Queue>,
    notify: Notify,
    next_session: AtomicU64,
    refuse_connects: AtomicU32,
    reject_publishes: AtomicU32,
    connects: AtomicU64,
}

impl MemoryBroker {
    /// `label` is the backend name this broker reports in logs and metrics.
    pub fn new(label: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            label,
            queue: Mutex::new(Queue::default()),
            notify: Notify::new(),
            next_session: AtomicU64::new(1),
            refuse_connects: AtomicU32::new(0),
            reject_publishes: AtomicU32::new(0),
            connects: AtomicU64::new(0),
        })
    }

    pub fn label(&self) -> BackendKind {
        self.label
    }

    /// Messages waiting for delivery.
    pub fn depth(&self) -> usize {
        self.lock().ready.len()
    }

    /// Delivered but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.lock().unacked.len()
    }

    pub fn connection_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_next_connects(&self, n: u32) {
        self.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` publishes with a transient fault.
    pub fn reject_next_publishes(&self, n: u32) {
        self.reject_publishes.store(n, Ordering::SeqCst);
    }

    /// Enqueue raw bytes, bypassing every producer.
    pub fn inject(&self, envelope: impl Into<Vec<u8>>) {
        self.lock().ready.push_back(envelope.into());
        self.notify.notify_one();
    }

    /// Kill every live connection as a broker restart would.
    pub fn drop_connections(&self, reason: &str) {
        let sessions: Vec<(u64, LostSignal)> = {
            let mut queue = self.lock();
            let sessions: Vec<_> = queue.sessions.drain().collect();
            for (session, _) in &sessions {
                queue.requeue_session(*session);
            }
            sessions
        };
        for (_, signal) in sessions {
            signal.notify(reason);
        }
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_token(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// One connection to a [`MemoryBroker`].
pub struct MemoryChannel {
    broker: Arc<MemoryBroker>,
    session: u64,
    signal: LostSignal,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn check_open(&self) -> Result<(), TransportFault> {
        if self.closed.load(Ordering::SeqCst) || self.signal.is_lost() {
            return Err(TransportFault::fatal(self.broker.label, "connection closed"));
        }
        Ok(())
    }

    fn push(&self, envelope: Vec<u8>) -> Result<(), TransportFault> {
        self.check_open()?;
        if MemoryBroker::take_token(&self.broker.reject_publishes) {
            return Err(TransportFault::transient(self.broker.label, "publish rejected"));
        }
        self.broker.lock().ready.push_back(envelope);
        self.broker.notify.notify_one();
        Ok(())
    }

    fn pop(&self) -> Result<Option<(u64, Vec<u8>)>, TransportFault> {
        self.check_open()?;
        let mut queue = self.broker.lock();
        let Some(envelope) = queue.ready.pop_front() else {
            return Ok(None);
        };
        queue.next_tag += 1;
        let tag = queue.next_tag;
        queue.unacked.insert(
            tag,
            Unacked {
                session: self.session,
                envelope: envelope.clone(),
            },
        );
        Ok(Some((tag, envelope)))
    }

    fn settle(&self, tag: u64, outcome: DeliveryOutcome) -> Result<(), TransportFault> {
        self.check_open()?;
        let mut queue = self.broker.lock();
        let Some(unacked) = queue.unacked.remove(&tag) else {
            return Err(TransportFault::transient(
                self.broker.label,
                format!("unknown delivery tag {}", tag),
            ));
        };
        if outcome == DeliveryOutcome::NackRequeue {
            queue.ready.push_front(unacked.envelope);
            drop(queue);
            self.broker.notify.notify_one();
        }
        Ok(())
    }
}

pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
}

impl MemoryConnector {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Channel = MemoryChannel;

    fn backend(&self) -> BackendKind {
        self.broker.label
    }

    async fn connect(&self, lost: LostSignal) -> Result<MemoryChannel, TransportFault> {
        if MemoryBroker::take_token(&self.broker.refuse_connects) {
            return Err(TransportFault::transient(self.broker.label, "connection refused"));
        }

        let session = self.broker.next_session.fetch_add(1, Ordering::SeqCst);
        self.broker.lock().sessions.insert(session, lost.clone());
        self.broker.connects.fetch_add(1, Ordering::SeqCst);

        Ok(MemoryChannel {
            broker: Arc::clone(&self.broker),
            session,
            signal: lost,
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self, channel: &MemoryChannel) {
        channel.closed.store(true, Ordering::SeqCst);
        let requeued = {
            let mut queue = self.broker.lock();
            queue.sessions.remove(&channel.session);
            queue.requeue_session(channel.session)
        };
        if requeued > 0 {
            self.broker.notify.notify_one();
        }
    }
}

pub struct MemoryPublisher {
    supervisor: Arc<ConnectionSupervisor<MemoryConnector>>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn backend(&self) -> BackendKind {
        self.supervisor.backend()
    }

    async fn publish(
        &self,
        envelope: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Duration, ConnectionError> {
        self.supervisor
            .with_channel(cancel, move |channel| async move {
                let started = Instant::now();
                channel.push(envelope)?;
                Ok(started.elapsed())
            })
            .await
    }

    async fn close(&self) {
        self.supervisor.close().await;
    }
}

pub struct MemoryReceiver {
    supervisor: Arc<ConnectionSupervisor<MemoryConnector>>,
    poll_timeout: Duration,
    generation: u64,
}

impl MemoryReceiver {
    pub fn new(supervisor: Arc<ConnectionSupervisor<MemoryConnector>>, poll_timeout: Duration) -> Self {
        Self {
            supervisor,
            poll_timeout,
            generation: 0,
        }
    }
}

#[async_trait]
impl Receiver for MemoryReceiver {
    fn backend(&self) -> BackendKind {
        self.supervisor.backend()
    }

    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, ConnectionError> {
        let channel = self.supervisor.acquire(cancel).await?;
        self.generation = channel.generation();
        let deadline = Instant::now() + self.poll_timeout;

        loop {
            let notified = channel.broker.notify.notified();
            match channel.pop() {
                Ok(Some((tag, envelope))) => {
                    let acker = MemoryAcker {
                        supervisor: Arc::clone(&self.supervisor),
                        generation: channel.generation(),
                        tag,
                    };
                    return Ok(Some(Delivery::new(envelope, Box::new(acker))));
                }
                Ok(None) => {}
                Err(fault) => return Err(fault.into()),
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                _ = cancel.cancelled() => return Ok(None),
            }
        }
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

struct MemoryAcker {
    supervisor: Arc<ConnectionSupervisor<MemoryConnector>>,
    generation: u64,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn settle(self: Box<Self>, outcome: DeliveryOutcome) -> Result<(), ConnectionError> {
        let tag = self.tag;
        self.supervisor
            .with_current_channel(self.generation, move |channel| async move {
                channel.settle(tag, outcome)
            })
            .await
    }
}

/// Wire a memory backend onto `broker`. Producer and consumer get
/// independent supervisors.
pub fn build(config: &BackendConfig, broker: Arc<MemoryBroker>) -> BackendParts {
    let producer = Arc::new(ConnectionSupervisor::new(
        MemoryConnector::new(Arc::clone(&broker)),
        config.retry,
    ));
    let consumer = Arc::new(ConnectionSupervisor::new(
        MemoryConnector::new(broker),
        config.retry,
    ));

    let states = vec![
        (Role::Producer, producer.subscribe()),
        (Role::Consumer, consumer.subscribe()),
    ];
    let poll_timeout = config.poll_timeout;
    let receivers: ReceiverFactory = Arc::new(move || {
        Box::new(MemoryReceiver::new(Arc::clone(&consumer), poll_timeout)) as Box<dyn Receiver>
    });

    BackendParts {
        publisher: Arc::new(MemoryPublisher {
            supervisor: producer,
        }),
        receivers,
        states,
    }
}
