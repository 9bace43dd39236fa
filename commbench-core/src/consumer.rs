// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Standing consumer loop for one backend.
//!
//! Every delivery is settled exactly once:
//! - malformed envelope: `NackDrop`, never requeued, no metrics
//! - timestamp store failure: `NackRequeue`, the record stays for the retry
//! - anything else: `Ack`, with turnaround emitted only when the record existed
//!
//! Receive faults never escape [`Consumer::run`] except an exhausted retry
//! budget under [`ExhaustedAction::Stop`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::codec::{DelimitedCodec, MessageCodec};
use crate::config::{BackendConfig, ExhaustedAction};
use crate::error::{ConnectionError, FaultKind};
use crate::metrics::{MetricObservation, MetricsSink};
use crate::store::TimestampStore;
use crate::transport::Receiver;
use crate::types::{BackendKind, DeliveryOutcome, MessageId, Role};

/// Observes every well-formed message after its record was taken.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, backend: BackendKind, id: &MessageId, payload: &[u8]);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl MessageHandler for NoopHandler {
    fn on_message(&self, _backend: BackendKind, _id: &MessageId, _payload: &[u8]) {}
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Value of the `message_type` label on turnaround observations.
    pub message_type: String,
    pub on_exhausted: ExhaustedAction,
    /// Pause after a transient receive fault before polling again.
    pub transient_pause: Duration,
}

impl ConsumerSettings {
    pub fn for_backend(config: &BackendConfig, message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            on_exhausted: config.on_exhausted,
            ..Self::default()
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            message_type: "default".to_string(),
            on_exhausted: ExhaustedAction::Restart {
                cooldown: Duration::from_secs(5),
            },
            transient_pause: Duration::from_secs(1),
        }
    }
}

/// Counters kept by one consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dropped: u64,
    /// Acked deliveries whose enqueue record was missing.
    pub unmatched: u64,
    pub restarts: u64,
}

impl ConsumerStats {
    fn count(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Ack => self.acked += 1,
            DeliveryOutcome::NackRequeue => self.requeued += 1,
            DeliveryOutcome::NackDrop => self.dropped += 1,
        }
    }
}

pub struct Consumer {
    backend: BackendKind,
    receiver: Box<dyn Receiver>,
    store: Arc<dyn TimestampStore>,
    sink: Arc<dyn MetricsSink>,
    codec: Arc<dyn MessageCodec>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn MessageHandler>,
    settings: ConsumerSettings,
    stats: ConsumerStats,
}

impl Consumer {
    pub fn new(
        receiver: Box<dyn Receiver>,
        store: Arc<dyn TimestampStore>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            backend: receiver.backend(),
            receiver,
            store,
            sink,
            codec: Arc::new(DelimitedCodec),
            clock: Arc::new(SystemClock),
            handler: Arc::new(NoopHandler),
            settings: ConsumerSettings::default(),
            stats: ConsumerStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Receive and settle at most one delivery.
    ///
    /// `Ok(None)` means the poll timed out or `cancel` fired. Errors are
    /// receive faults only; processing problems are settled, not returned.
    ///
    /// Latency is how long the receive call took to hand the delivery
    /// over. Response time runs from receipt through settle.
    pub async fn poll_once(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<DeliveryOutcome>, ConnectionError> {
        let receive_started = Instant::now();
        let Some(delivery) = self.receiver.receive(cancel).await? else {
            return Ok(None);
        };
        let receive_latency = receive_started.elapsed();
        let started = Instant::now();
        self.stats.received += 1;

        let outcome = match self.codec.decode(delivery.envelope()) {
            Ok(envelope) => {
                let outcome = self.take_record(&envelope.id).await;
                if outcome == DeliveryOutcome::Ack {
                    self.handler
                        .on_message(self.backend, &envelope.id, &envelope.payload);
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(
                    backend = %self.backend,
                    fault = %FaultKind::Malformed,
                    error = %e,
                    "Dropping malformed message"
                );
                None
            }
        };
        let well_formed = outcome.is_some();
        let outcome = outcome.unwrap_or(DeliveryOutcome::NackDrop);

        if let Err(e) = delivery.settle(outcome).await {
            if self.receiver.redelivers_unsettled() {
                tracing::warn!(
                    backend = %self.backend,
                    outcome = %outcome,
                    error = %e,
                    "Failed to settle delivery; the broker will redeliver it"
                );
            } else {
                tracing::warn!(
                    backend = %self.backend,
                    outcome = %outcome,
                    error = %e,
                    "Failed to settle delivery; the message is lost"
                );
            }
        }
        self.stats.count(outcome);

        if well_formed {
            self.sink.observe(MetricObservation::latency(
                self.backend,
                Role::Consumer,
                receive_latency.as_secs_f64(),
            ));
            self.sink.observe(MetricObservation::response_time(
                self.backend,
                Role::Consumer,
                started.elapsed().as_secs_f64(),
            ));
        }

        Ok(Some(outcome))
    }

    /// Read then delete the enqueue record and emit turnaround.
    async fn take_record(&mut self, id: &MessageId) -> DeliveryOutcome {
        let key = id.enqueue_key();

        let enqueued_at = match self.store.get(&key).await {
            Ok(Some(enqueued_at)) => enqueued_at,
            Ok(None) => {
                tracing::warn!(
                    backend = %self.backend,
                    message_id = %id,
                    "No enqueue record for message; turnaround not measured"
                );
                self.stats.unmatched += 1;
                return DeliveryOutcome::Ack;
            }
            Err(e) => {
                self.log_processing_fault(id, &e);
                return DeliveryOutcome::NackRequeue;
            }
        };

        if let Err(e) = self.store.delete(&key).await {
            self.log_processing_fault(id, &e);
            return DeliveryOutcome::NackRequeue;
        }

        // Clock skew between hosts can put the record in the future.
        let turnaround_ms = (self.clock.now_ms() - enqueued_at).max(0);
        self.sink.observe(MetricObservation::turnaround(
            &self.settings.message_type,
            self.backend,
            turnaround_ms as f64 / 1000.0,
        ));
        tracing::trace!(backend = %self.backend, message_id = %id, turnaround_ms, "Consumed");

        DeliveryOutcome::Ack
    }

    fn log_processing_fault(&self, id: &MessageId, err: &dyn std::error::Error) {
        tracing::error!(
            backend = %self.backend,
            message_id = %id,
            fault = %FaultKind::Processing,
            error = %err,
            "Timestamp store failed; requeueing message"
        );
    }

    /// Poll until `cancel` fires, reconnecting through the supervisor on
    /// fatal faults.
    ///
    /// Returns the final counters, or the exhaustion error when the backend
    /// is configured to stop.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ConsumerStats, ConnectionError> {
        tracing::info!(backend = %self.backend, "Consumer started");

        while !cancel.is_cancelled() {
            let err = match self.poll_once(&cancel).await {
                Ok(_) => continue,
                Err(e) if e.is_cancelled() => break,
                Err(e) => e,
            };

            if let ConnectionError::Exhausted { .. } = err {
                match self.settings.on_exhausted {
                    ExhaustedAction::Restart { cooldown } => {
                        tracing::error!(
                            backend = %self.backend,
                            severity = "critical",
                            error = %err,
                            cooldown_ms = cooldown.as_millis() as u64,
                            "Consumer connection exhausted; restarting after cooldown"
                        );
                        self.stats.restarts += 1;
                        if !Self::pause(cooldown, &cancel).await {
                            break;
                        }
                        self.receiver.rearm().await;
                    }
                    ExhaustedAction::Stop => {
                        tracing::error!(
                            backend = %self.backend,
                            severity = "critical",
                            error = %err,
                            "Consumer connection exhausted; stopping"
                        );
                        self.receiver.close().await;
                        return Err(err);
                    }
                }
                continue;
            }

            match err.fault_kind() {
                FaultKind::Fatal => {
                    tracing::warn!(
                        backend = %self.backend,
                        error = %err,
                        "Receive failed; reconnecting"
                    );
                    self.receiver.reset(&err.to_string()).await;
                }
                _ => {
                    tracing::debug!(backend = %self.backend, error = %err, "Transient receive fault");
                    if !Self::pause(self.settings.transient_pause, &cancel).await {
                        break;
                    }
                }
            }
        }

        self.receiver.close().await;
        tracing::info!(
            backend = %self.backend,
            received = self.stats.received,
            acked = self.stats.acked,
            requeued = self.stats.requeued,
            dropped = self.stats.dropped,
            "Consumer stopped"
        );
        Ok(self.stats)
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
