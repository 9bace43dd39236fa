// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Backend-neutral publish and receive seams.
//!
//! Pushed deliveries (AMQP consumer stream) and pulled ones (Kafka poll,
//! Redis BRPOP) both surface through [`Receiver::receive`], which waits at
//! most one poll timeout and returns `Ok(None)` when nothing arrived.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;
use crate::types::{BackendKind, DeliveryOutcome};

/// Settles one delivery with the broker it came from.
#[async_trait]
pub trait Acknowledger: Send {
    async fn settle(self: Box<Self>, outcome: DeliveryOutcome) -> Result<(), ConnectionError>;
}

/// Acknowledger for deliveries that were removed from the broker on receipt.
#[derive(Debug, Default)]
pub struct NoopAcknowledger;

#[async_trait]
impl Acknowledger for NoopAcknowledger {
    async fn settle(self: Box<Self>, _outcome: DeliveryOutcome) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// A received envelope together with the means to settle it.
pub struct Delivery {
    envelope: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(envelope: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { envelope, acker }
    }

    pub fn envelope(&self) -> &[u8] {
        &self.envelope
    }

    pub async fn settle(self, outcome: DeliveryOutcome) -> Result<(), ConnectionError> {
        self.acker.settle(outcome).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope_len", &self.envelope.len())
            .finish_non_exhaustive()
    }
}

/// Consumer side of a backend. Owned by exactly one consumer loop.
#[async_trait]
pub trait Receiver: Send {
    fn backend(&self) -> BackendKind;

    /// Wait up to one poll timeout for the next delivery.
    ///
    /// Connects through the backend's supervisor first when needed, so this
    /// may block for the whole backoff schedule and fail with
    /// [`ConnectionError::Exhausted`].
    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, ConnectionError>;

    /// Whether the broker hands a delivery out again when its settle never
    /// reached it. Queues that pop on receive lose such messages.
    fn redelivers_unsettled(&self) -> bool {
        true
    }

    /// Drop the current subscription after a fatal fault; the next
    /// `receive` reconnects.
    async fn reset(&mut self, reason: &str);

    /// Clear an exhausted retry budget so the next `receive` starts over.
    async fn rearm(&mut self);

    /// Best-effort clean close.
    async fn close(&mut self);
}

/// Producer side of a backend. Shared by every concurrent `produce` call.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Publish one envelope, connecting first when needed.
    ///
    /// Returns the time spent in the broker call itself, excluding any
    /// connect or backoff wait before a channel was available.
    async fn publish(
        &self,
        envelope: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Duration, ConnectionError>;

    async fn close(&self);
}
