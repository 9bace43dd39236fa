// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Loopback harness: produce and consume through the in-process broker.
//!
//! The harness wires a registry onto a fresh [`MemoryBroker`], starts its
//! consumer, publishes a fixed number of messages from concurrent workers
//! and waits until every message has produced a turnaround observation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use commbench_core::backends::{memory, MemoryBroker};
use commbench_core::metrics::LABEL_ROLE;
use commbench_core::{
    BackendConfig, BackendKind, BackendRegistry, Clock, CommbenchError, MemoryTimestampStore,
    MetricKind, NoopHandler, RecordingSink, RegistryOptions, Role, SystemClock,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::metrics::LatencyMetrics;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Core(#[from] CommbenchError),

    #[error("Timed out with {observed}/{expected} messages consumed")]
    Timeout { expected: u64, observed: u64 },

    #[error("Producer worker failed: {0}")]
    Worker(String),
}

/// Result of one loopback run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopbackReport {
    pub messages: u64,
    pub concurrency: usize,
    pub payload_bytes: usize,
    pub elapsed_ms: f64,
    pub throughput_msgs_per_sec: f64,
    pub acked: u64,
    pub turnaround: LatencyMetrics,
    pub publish_latency: LatencyMetrics,
    pub consume_response: LatencyMetrics,
    /// Wall-clock time the run finished, epoch milliseconds.
    pub generated_at_ms: i64,
}

/// Configures and runs loopback round trips.
#[derive(Debug, Clone)]
pub struct LoopbackHarness {
    messages: u64,
    concurrency: usize,
    payload_bytes: usize,
    poll_timeout: Duration,
    deadline: Duration,
    message_type: String,
}

impl Default for LoopbackHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHarness {
    pub fn new() -> Self {
        Self {
            messages: 1_000,
            concurrency: 1,
            payload_bytes: 64,
            poll_timeout: Duration::from_millis(10),
            deadline: Duration::from_secs(30),
            message_type: "loopback".to_string(),
        }
    }

    pub fn messages(mut self, messages: u64) -> Self {
        self.messages = messages;
        self
    }

    /// Number of concurrent producer workers. Zero is treated as one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn payload_bytes(mut self, bytes: usize) -> Self {
        self.payload_bytes = bytes;
        self
    }

    /// How long to wait for the consumer to drain before giving up.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn run(&self) -> Result<LoopbackReport, HarnessError> {
        let mut config = BackendConfig::defaults(BackendKind::Memory);
        config.poll_timeout = self.poll_timeout;
        let parts = memory::build(&config, MemoryBroker::new(BackendKind::Memory));

        let sink = Arc::new(RecordingSink::new());
        let options = RegistryOptions {
            message_type: self.message_type.clone(),
            ..RegistryOptions::default()
        };
        let registry = Arc::new(BackendRegistry::new(
            Arc::new(MemoryTimestampStore::new()),
            sink.clone(),
            options,
        ));
        registry.register(config, parts)?;
        let consumer = registry.start_consumer(BackendKind::Memory, Arc::new(NoopHandler))?;

        let outcome = self.drive(&registry, &sink).await;
        registry.shutdown_all().await;
        let stats = consumer.join().await?;
        let elapsed = outcome?;

        let secs = elapsed.as_secs_f64();
        let report = LoopbackReport {
            messages: self.messages,
            concurrency: self.concurrency,
            payload_bytes: self.payload_bytes,
            elapsed_ms: secs * 1000.0,
            throughput_msgs_per_sec: if secs > 0.0 {
                self.messages as f64 / secs
            } else {
                0.0
            },
            acked: stats.acked,
            turnaround: LatencyMetrics::from_seconds(values(&sink, MetricKind::Turnaround, None)),
            publish_latency: LatencyMetrics::from_seconds(values(
                &sink,
                MetricKind::Latency,
                Some(Role::Producer),
            )),
            consume_response: LatencyMetrics::from_seconds(values(
                &sink,
                MetricKind::ResponseTime,
                Some(Role::Consumer),
            )),
            generated_at_ms: SystemClock.now_ms(),
        };

        tracing::info!(
            messages = report.messages,
            elapsed_ms = report.elapsed_ms,
            throughput = report.throughput_msgs_per_sec,
            "Loopback run complete"
        );
        Ok(report)
    }

    /// Publish every message and wait for all turnarounds. Returns the time
    /// from first publish to last turnaround.
    async fn drive(
        &self,
        registry: &Arc<BackendRegistry>,
        sink: &RecordingSink,
    ) -> Result<Duration, HarnessError> {
        let cancel = CancellationToken::new();
        let remaining = Arc::new(AtomicU64::new(self.messages));
        let payload: Arc<[u8]> = vec![b'x'; self.payload_bytes].into();
        let started = Instant::now();

        let workers: Vec<_> = (0..self.concurrency)
            .map(|_| {
                let registry = Arc::clone(registry);
                let remaining = Arc::clone(&remaining);
                let payload = Arc::clone(&payload);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    while remaining
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok()
                    {
                        registry.produce(BackendKind::Memory, &payload, &cancel).await?;
                    }
                    Ok::<(), CommbenchError>(())
                })
            })
            .collect();

        for worker in workers {
            worker
                .await
                .map_err(|e| HarnessError::Worker(e.to_string()))??;
        }

        loop {
            let observed = sink.of_kind(MetricKind::Turnaround).len() as u64;
            if observed >= self.messages {
                return Ok(started.elapsed());
            }
            if started.elapsed() > self.deadline {
                return Err(HarnessError::Timeout {
                    expected: self.messages,
                    observed,
                });
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

fn values(sink: &RecordingSink, kind: MetricKind, role: Option<Role>) -> Vec<f64> {
    sink.of_kind(kind)
        .into_iter()
        .filter(|obs| role.map_or(true, |r| obs.label(LABEL_ROLE) == Some(r.name())))
        .map(|obs| obs.value_seconds)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_message_is_measured() {
        let report = LoopbackHarness::new()
            .messages(200)
            .concurrency(4)
            .payload_bytes(16)
            .run()
            .await
            .unwrap();

        assert_eq!(report.messages, 200);
        assert_eq!(report.acked, 200);
        assert_eq!(report.turnaround.count, 200);
        assert_eq!(report.publish_latency.count, 200);
        assert_eq!(report.consume_response.count, 200);
        assert!(report.throughput_msgs_per_sec > 0.0);
    }

    #[tokio::test]
    async fn test_zero_messages() {
        let report = LoopbackHarness::new().messages(0).run().await.unwrap();
        assert_eq!(report.acked, 0);
        assert_eq!(report.turnaround, LatencyMetrics::default());
    }

    #[test]
    fn test_zero_concurrency_is_one() {
        let harness = LoopbackHarness::new().concurrency(0);
        assert_eq!(harness.concurrency, 1);
    }
}
