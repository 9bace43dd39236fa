// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Enqueue-timestamp store used to correlate producer and consumer.
//!
//! Producers write `enqueue:<id>` before publishing; the consumer reads the
//! value and deletes the key exactly once. Keys that are never consumed expire
//! on their own when a TTL is given.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{CommbenchResult, StoreError};

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryTimestampStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisTimestampStore;

/// Key/value capability holding epoch-millisecond timestamps.
///
/// A missing key is `Ok(None)`, never an error. `delete` of a missing key
/// succeeds.
#[async_trait]
pub trait TimestampStore: Send + Sync {
    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Build the store named by the configuration.
pub async fn connect(config: &StoreConfig) -> CommbenchResult<Arc<dyn TimestampStore>> {
    match &config.backend {
        StoreBackend::Memory => {
            tracing::warn!(
                "Using in-process timestamp store; turnaround is only measured for messages produced by this process"
            );
            Ok(Arc::new(MemoryTimestampStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis { url } => {
            let store = RedisTimestampStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis { .. } => Err(crate::error::HardValidationError::BackendNotCompiled {
            backend: crate::types::BackendKind::Redis,
            feature: "redis",
        }
        .into()),
    }
}
