// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Connection supervisor: one physical connection per backend instance,
//! rebuilt with exponential backoff.
//!
//! State and the live channel sit behind a single async mutex. Whoever holds
//! it while the state is not `Connected` runs the connect/backoff loop; every
//! other caller queues on the mutex and receives the same channel, so a
//! supervisor never opens two physical connections at once.
//!
//! Each successful connect bumps a generation counter. Deliveries remember
//! the generation they arrived on, and settling is refused once that channel
//! is gone ([`ConnectionError::ChannelClosed`]).

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::{ConnectionError, TransportFault};
use crate::state::{ConnectionSnapshot, ConnectionState, ConnectionStateMachine};
use crate::types::BackendKind;

/// Emitted once per lost channel generation.
#[derive(Debug, Clone)]
pub struct ConnectionLost {
    pub backend: BackendKind,
    pub generation: u64,
    pub reason: String,
}

type LostListener = Arc<dyn Fn(&ConnectionLost) + Send + Sync>;

struct LostShared {
    backend: BackendKind,
    /// Highest generation reported lost. Generations start at 1.
    lost_generation: AtomicU64,
    listeners: StdMutex<Vec<LostListener>>,
}

impl LostShared {
    fn fire(&self, event: &ConnectionLost) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Handle given to a connector so client callbacks can report a dead
/// connection without touching the supervisor mutex.
#[derive(Clone)]
pub struct LostSignal {
    generation: u64,
    shared: Arc<LostShared>,
}

impl LostSignal {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_lost(&self) -> bool {
        self.shared.lost_generation.load(Ordering::Acquire) >= self.generation
    }

    /// Mark this generation lost. Only the first report per generation is
    /// logged and forwarded to listeners.
    pub fn notify(&self, reason: impl Into<String>) {
        let previous = self
            .shared
            .lost_generation
            .fetch_max(self.generation, Ordering::AcqRel);
        if previous >= self.generation {
            return;
        }

        let event = ConnectionLost {
            backend: self.shared.backend,
            generation: self.generation,
            reason: reason.into(),
        };
        tracing::warn!(
            backend = %event.backend,
            generation = event.generation,
            reason = %event.reason,
            "Connection lost"
        );
        self.shared.fire(&event);
    }
}

impl fmt::Debug for LostSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LostSignal")
            .field("backend", &self.shared.backend)
            .field("generation", &self.generation)
            .field("lost", &self.is_lost())
            .finish()
    }
}

/// Opens and closes the physical connection of one backend.
///
/// `connect` covers the whole handshake including setup (queue declaration,
/// QoS, subscription, readiness probes). It is always called with the
/// supervisor mutex held.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Channel: Send + Sync + 'static;

    fn backend(&self) -> BackendKind;

    async fn connect(&self, lost: LostSignal) -> Result<Self::Channel, TransportFault>;

    /// Best-effort close; errors are logged by the implementation.
    async fn close(&self, channel: &Self::Channel);
}

/// A connected channel and the generation it belongs to.
pub struct ChannelLease<Ch> {
    handle: Arc<Ch>,
    generation: u64,
}

impl<Ch> ChannelLease<Ch> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn shared(&self) -> Arc<Ch> {
        Arc::clone(&self.handle)
    }
}

impl<Ch> Clone for ChannelLease<Ch> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            generation: self.generation,
        }
    }
}

impl<Ch> Deref for ChannelLease<Ch> {
    type Target = Ch;

    fn deref(&self) -> &Ch {
        &self.handle
    }
}

struct Inner<Ch> {
    machine: ConnectionStateMachine,
    channel: Option<Arc<Ch>>,
    /// Generation of the most recent connect attempt.
    generation: u64,
    /// Consecutive failed attempts since the last successful connect.
    failures: u32,
    /// Last error once the retry budget is used up.
    exhausted: Option<String>,
}

pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    policy: RetryPolicy,
    inner: Mutex<Inner<C::Channel>>,
    state_tx: watch::Sender<ConnectionState>,
    lost: Arc<LostShared>,
    live_generation: AtomicU64,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        let backend = connector.backend();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            policy,
            inner: Mutex::new(Inner {
                machine: ConnectionStateMachine::new(backend),
                channel: None,
                generation: 0,
                failures: 0,
                exhausted: None,
            }),
            state_tx,
            lost: Arc::new(LostShared {
                backend,
                lost_generation: AtomicU64::new(0),
                listeners: StdMutex::new(Vec::new()),
            }),
            live_generation: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.lost.backend
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Current state without taking the mutex.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Connected and not yet reported lost.
    pub fn is_connected(&self) -> bool {
        let live = self.live_generation.load(Ordering::Acquire);
        self.state() == ConnectionState::Connected
            && live > 0
            && self.lost.lost_generation.load(Ordering::Acquire) < live
    }

    /// Register a callback fired once per lost channel generation.
    pub fn on_lost<F>(&self, listener: F)
    where
        F: Fn(&ConnectionLost) + Send + Sync + 'static,
    {
        self.lost
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot::from(&self.inner.lock().await.machine)
    }

    /// Return the live channel, connecting first if needed.
    ///
    /// Blocks through the backoff schedule. Fails with `Exhausted` once the
    /// retry budget is used up and with `Cancelled` as soon as `cancel` fires.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ChannelLease<C::Channel>, ConnectionError> {
        let mut inner = self.lock(cancel).await?;
        self.ensure_connected(&mut inner, cancel).await
    }

    /// Run `op` on the live channel with the mutex held, connecting first if
    /// needed. A fatal fault from `op` retires the channel.
    pub async fn with_channel<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, ConnectionError>
    where
        F: FnOnce(ChannelLease<C::Channel>) -> Fut,
        Fut: Future<Output = Result<T, TransportFault>>,
    {
        let mut inner = self.lock(cancel).await?;
        let lease = self.ensure_connected(&mut inner, cancel).await?;
        let generation = lease.generation;

        let result = tokio::select! {
            result = op(lease) => result,
            _ = cancel.cancelled() => {
                return Err(ConnectionError::Cancelled { backend: self.backend() })
            }
        };
        self.retire_on_fatal(&mut inner, generation, result).await
    }

    /// Run `op` only if the channel of `generation` is still live. Used to
    /// settle deliveries; never reconnects.
    pub async fn with_current_channel<T, F, Fut>(
        &self,
        generation: u64,
        op: F,
    ) -> Result<T, ConnectionError>
    where
        F: FnOnce(ChannelLease<C::Channel>) -> Fut,
        Fut: Future<Output = Result<T, TransportFault>>,
    {
        let mut inner = self.inner.lock().await;
        let lease = match &inner.channel {
            Some(channel)
                if inner.generation == generation
                    && inner.machine.state() == ConnectionState::Connected
                    && self.lost.lost_generation.load(Ordering::Acquire) < generation =>
            {
                ChannelLease {
                    handle: Arc::clone(channel),
                    generation,
                }
            }
            _ => {
                return Err(ConnectionError::ChannelClosed {
                    backend: self.backend(),
                })
            }
        };

        let result = op(lease).await;
        self.retire_on_fatal(&mut inner, generation, result).await
    }

    /// Report the channel of `generation` unusable. No-op for older
    /// generations.
    pub async fn invalidate(&self, generation: u64, reason: &str) {
        if generation == 0 {
            return;
        }
        self.signal(generation).notify(reason);
        let mut inner = self.inner.lock().await;
        self.reap_lost(&mut inner).await;
    }

    /// Close the live channel and return to `Disconnected`.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(channel) = inner.channel.take() {
            self.connector.close(&channel).await;
            tracing::info!(backend = %self.backend(), generation = inner.generation, "Connection closed");
        }
        inner.failures = 0;
        self.transition(&mut inner, ConnectionState::Disconnected);
    }

    /// Clear an exhausted budget so the next `acquire` starts a fresh schedule.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if inner.exhausted.take().is_some() {
            inner.failures = 0;
            tracing::info!(backend = %self.backend(), "Retry budget reset");
        }
    }

    async fn lock(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, Inner<C::Channel>>, ConnectionError> {
        tokio::select! {
            guard = self.inner.lock() => Ok(guard),
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled { backend: self.backend() }),
        }
    }

    fn signal(&self, generation: u64) -> LostSignal {
        LostSignal {
            generation,
            shared: Arc::clone(&self.lost),
        }
    }

    fn transition(&self, inner: &mut Inner<C::Channel>, target: ConnectionState) {
        if inner.machine.state() == target {
            return;
        }
        match inner.machine.transition_to(target) {
            Ok(()) => {
                self.state_tx.send_replace(target);
            }
            Err(e) => tracing::error!(error = %e, "Rejected connection state transition"),
        }
    }

    async fn retire_on_fatal<T>(
        &self,
        inner: &mut Inner<C::Channel>,
        generation: u64,
        result: Result<T, TransportFault>,
    ) -> Result<T, ConnectionError> {
        match result {
            Ok(value) => Ok(value),
            Err(fault) => {
                if fault.is_fatal() {
                    self.signal(generation).notify(fault.message.clone());
                    self.reap_lost(inner).await;
                }
                Err(fault.into())
            }
        }
    }

    /// Move a connected-but-lost channel into backoff.
    async fn reap_lost(&self, inner: &mut Inner<C::Channel>) {
        if inner.machine.state() != ConnectionState::Connected
            || self.lost.lost_generation.load(Ordering::Acquire) < inner.generation
        {
            return;
        }

        if let Some(channel) = inner.channel.take() {
            self.connector.close(&channel).await;
        }
        // The loss itself counts as the first failed attempt.
        inner.failures = 1;
        self.transition(inner, ConnectionState::BackingOff);
    }

    async fn ensure_connected(
        &self,
        inner: &mut Inner<C::Channel>,
        cancel: &CancellationToken,
    ) -> Result<ChannelLease<C::Channel>, ConnectionError> {
        let backend = self.backend();
        self.reap_lost(inner).await;

        if inner.machine.state() == ConnectionState::Connected {
            if let Some(channel) = &inner.channel {
                return Ok(ChannelLease {
                    handle: Arc::clone(channel),
                    generation: inner.generation,
                });
            }
        }

        if let Some(last_error) = &inner.exhausted {
            return Err(ConnectionError::Exhausted {
                backend,
                attempts: inner.failures,
                last_error: last_error.clone(),
            });
        }

        loop {
            if inner.machine.state() == ConnectionState::BackingOff {
                let delay = self.policy.delay_for(inner.failures);
                tracing::info!(
                    backend = %backend,
                    attempt = inner.failures,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before reconnect"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        self.transition(inner, ConnectionState::Disconnected);
                        return Err(ConnectionError::Cancelled { backend });
                    }
                }
            }

            self.transition(inner, ConnectionState::Connecting);
            inner.generation += 1;
            let generation = inner.generation;

            let attempt = tokio::select! {
                attempt = self.connector.connect(self.signal(generation)) => attempt,
                _ = cancel.cancelled() => {
                    self.transition(inner, ConnectionState::Disconnected);
                    return Err(ConnectionError::Cancelled { backend });
                }
            };

            match attempt {
                Ok(channel) => {
                    let channel = Arc::new(channel);
                    inner.channel = Some(Arc::clone(&channel));
                    inner.failures = 0;
                    self.live_generation.store(generation, Ordering::Release);
                    self.transition(inner, ConnectionState::Connected);
                    tracing::info!(backend = %backend, generation, "Connected");
                    return Ok(ChannelLease {
                        handle: channel,
                        generation,
                    });
                }
                Err(fault) => {
                    inner.failures = inner.failures.saturating_add(1);

                    if self.policy.is_exhausted(inner.failures) {
                        self.transition(inner, ConnectionState::Disconnected);
                        tracing::error!(
                            severity = "critical",
                            backend = %backend,
                            attempts = inner.failures,
                            error = %fault,
                            "Connection retry budget exhausted"
                        );
                        inner.exhausted = Some(fault.to_string());
                        return Err(ConnectionError::Exhausted {
                            backend,
                            attempts: inner.failures,
                            last_error: fault.to_string(),
                        });
                    }

                    tracing::warn!(
                        backend = %backend,
                        attempt = inner.failures,
                        max_attempts = %self.policy.max_attempts,
                        error = %fault,
                        "Connection attempt failed"
                    );
                    self.transition(inner, ConnectionState::BackingOff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::config::MaxAttempts;

    /// Fails the first `failures` attempts, then hands out the generation
    /// number as the channel.
    struct ScriptedConnector {
        failures_left: AtomicU32,
        connects: AtomicU32,
        closes: AtomicU32,
        attempts_at: StdMutex<Vec<Instant>>,
        signals: StdMutex<Vec<LostSignal>>,
        handshake: Duration,
    }

    impl ScriptedConnector {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                connects: AtomicU32::new(0),
                closes: AtomicU32::new(0),
                attempts_at: StdMutex::new(Vec::new()),
                signals: StdMutex::new(Vec::new()),
                handshake: Duration::ZERO,
            }
        }

        fn last_signal(&self) -> LostSignal {
            self.signals.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Channel = u64;

        fn backend(&self) -> BackendKind {
            BackendKind::Memory
        }

        async fn connect(&self, lost: LostSignal) -> Result<u64, TransportFault> {
            self.attempts_at.lock().unwrap().push(Instant::now());
            if !self.handshake.is_zero() {
                tokio::time::sleep(self.handshake).await;
            }
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportFault::transient(BackendKind::Memory, "connection refused"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let generation = lost.generation();
            self.signals.lock().unwrap().push(lost);
            Ok(generation)
        }

        async fn close(&self, _channel: &u64) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn policy(max_attempts: MaxAttempts) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(5), Duration::from_secs(60)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_between_attempts() {
        let supervisor = ConnectionSupervisor::new(ScriptedConnector::new(5), policy(MaxAttempts::Bounded(12)));
        let cancel = CancellationToken::new();

        let lease = supervisor.acquire(&cancel).await.unwrap();
        assert!(supervisor.is_connected());

        let attempts = supervisor.connector().attempts_at.lock().unwrap().clone();
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<u64> = attempts.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![5, 10, 20, 40, 60]);
        assert_eq!(lease.generation(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_opens_one_connection() {
        let mut connector = ScriptedConnector::new(0);
        connector.handshake = Duration::from_millis(100);
        let supervisor = Arc::new(ConnectionSupervisor::new(connector, policy(MaxAttempts::Bounded(3))));
        let cancel = CancellationToken::new();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let supervisor = Arc::clone(&supervisor);
            let cancel = cancel.clone();
            tasks.spawn(async move { supervisor.acquire(&cancel).await.map(|l| l.generation()) });
        }

        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), 1);
        }
        assert_eq!(supervisor.connector().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_sticky_until_reset() {
        let supervisor = ConnectionSupervisor::new(ScriptedConnector::new(100), policy(MaxAttempts::Bounded(3)));
        let cancel = CancellationToken::new();

        let err = supervisor.acquire(&cancel).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Exhausted { attempts: 3, .. }));
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        // No further attempts while exhausted
        let err = supervisor.acquire(&cancel).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Exhausted { .. }));
        assert_eq!(supervisor.connector().attempts_at.lock().unwrap().len(), 3);

        supervisor.reset().await;
        supervisor.connector().failures_left.store(0, Ordering::SeqCst);
        assert!(supervisor.acquire(&cancel).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_backoff() {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            ScriptedConnector::new(100),
            policy(MaxAttempts::Unbounded),
        ));
        let cancel = CancellationToken::new();

        let task = {
            let supervisor = Arc::clone(&supervisor);
            let cancel = cancel.clone();
            tokio::spawn(async move { supervisor.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(supervisor.state(), ConnectionState::BackingOff);
        let cancelled_at = Instant::now();
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::Cancelled { .. })));
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_signal_triggers_reconnect() {
        let supervisor = ConnectionSupervisor::new(ScriptedConnector::new(0), policy(MaxAttempts::Bounded(3)));
        let cancel = CancellationToken::new();
        let events = Arc::new(AtomicU32::new(0));
        {
            let events = Arc::clone(&events);
            supervisor.on_lost(move |_| {
                events.fetch_add(1, Ordering::SeqCst);
            });
        }

        let first = supervisor.acquire(&cancel).await.unwrap();
        let signal = supervisor.connector().last_signal();
        signal.notify("socket reset");
        signal.notify("socket reset again");
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert!(!supervisor.is_connected());

        let started = Instant::now();
        let second = supervisor.acquire(&cancel).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(supervisor.connector().closes.load(Ordering::SeqCst), 1);
        assert!(supervisor.is_connected());
    }

    #[tokio::test]
    async fn test_stale_generation_is_refused() {
        let supervisor = ConnectionSupervisor::new(ScriptedConnector::new(0), policy(MaxAttempts::Bounded(3)));
        let cancel = CancellationToken::new();

        let lease = supervisor.acquire(&cancel).await.unwrap();
        let ok = supervisor
            .with_current_channel(lease.generation(), |l| async move { Ok::<_, TransportFault>(*l) })
            .await;
        assert_eq!(ok.unwrap(), 1);

        supervisor.close().await;
        let stale = supervisor
            .with_current_channel(lease.generation(), |l| async move { Ok::<_, TransportFault>(*l) })
            .await;
        assert!(matches!(stale, Err(ConnectionError::ChannelClosed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_fault_retires_channel() {
        let supervisor = ConnectionSupervisor::new(ScriptedConnector::new(0), policy(MaxAttempts::Bounded(3)));
        let cancel = CancellationToken::new();

        let result = supervisor
            .with_channel(&cancel, |_| async {
                Err::<(), _>(TransportFault::fatal(BackendKind::Memory, "broken pipe"))
            })
            .await;
        assert!(matches!(result, Err(ConnectionError::Fault(_))));
        assert_eq!(supervisor.state(), ConnectionState::BackingOff);

        let generation = supervisor
            .with_channel(&cancel, |l| async move { Ok::<_, TransportFault>(l.generation()) })
            .await
            .unwrap();
        assert_eq!(generation, 2);
    }

    #[tokio::test]
    async fn test_transient_fault_keeps_channel() {
        let supervisor = ConnectionSupervisor::new(ScriptedConnector::new(0), policy(MaxAttempts::Bounded(3)));
        let cancel = CancellationToken::new();

        let result = supervisor
            .with_channel(&cancel, |_| async {
                Err::<(), _>(TransportFault::transient(BackendKind::Memory, "queue full"))
            })
            .await;
        assert!(result.is_err());
        assert!(supervisor.is_connected());
    }
}
