// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Request-driven producer for one backend.
//!
//! Each call writes the enqueue record first so that a consumer racing the
//! publish always finds it. The record write is best effort: when the store
//! is down the message still goes out and its turnaround is simply lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::codec::{DelimitedCodec, MessageCodec};
use crate::error::ConnectionError;
use crate::metrics::{MetricObservation, MetricsSink};
use crate::store::TimestampStore;
use crate::transport::Publisher;
use crate::types::{BackendKind, EnqueueRecord, MessageId, Role};

/// Default lifetime of an enqueue record nobody consumed.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(300);

pub struct Producer {
    backend: BackendKind,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn TimestampStore>,
    sink: Arc<dyn MetricsSink>,
    codec: Arc<dyn MessageCodec>,
    clock: Arc<dyn Clock>,
    record_ttl: Option<Duration>,
}

impl Producer {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn TimestampStore>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            backend: publisher.backend(),
            publisher,
            store,
            sink,
            codec: Arc::new(DelimitedCodec),
            clock: Arc::new(SystemClock),
            record_ttl: Some(DEFAULT_RECORD_TTL),
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

    /// `None` keeps records until a consumer takes them.
    pub fn with_record_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Publish one payload and return the id it was sent under.
    ///
    /// Blocks while the backend is reconnecting, up to the retry policy, and
    /// fails with [`ConnectionError::Exhausted`] once the budget is spent.
    pub async fn produce(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<MessageId, ConnectionError> {
        let started = Instant::now();
        let id = MessageId::generate();

        let record = EnqueueRecord::new(id.clone(), self.clock.now_ms(), self.record_ttl);
        if let Err(e) = self
            .store
            .set(&record.key(), record.enqueued_at_ms, record.ttl)
            .await
        {
            tracing::warn!(
                backend = %self.backend,
                message_id = %id,
                error = %e,
                "Failed to write enqueue record; turnaround will not be measured"
            );
        }

        let envelope = self.codec.encode(&id, payload);
        let latency = self.publisher.publish(envelope, cancel).await?;

        self.sink.observe(MetricObservation::latency(
            self.backend,
            Role::Producer,
            latency.as_secs_f64(),
        ));
        self.sink.observe(MetricObservation::response_time(
            self.backend,
            Role::Producer,
            started.elapsed().as_secs_f64(),
        ));

        tracing::trace!(backend = %self.backend, message_id = %id, "Published");
        Ok(id)
    }

    /// Close the publishing side of the backend.
    pub async fn close(&self) {
        self.publisher.close().await;
    }
}
