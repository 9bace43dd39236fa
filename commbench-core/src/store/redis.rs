// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, RedisError};
use async_trait::async_trait;

use super::TimestampStore;
use crate::error::StoreError;

/// Timestamp store on a Redis server.
///
/// Values are stored as base-10 strings so other tooling can read them.
/// `ConnectionManager` reconnects on its own, so this type has no supervisor.
#[derive(Clone)]
pub struct RedisTimestampStore {
    connection: ConnectionManager,
}

impl RedisTimestampStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Unavailable {
            reason: format!("invalid redis url: {}", e),
        })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: e.to_string(),
            })?;

        tracing::info!(url = %url, "Connected to redis timestamp store");
        Ok(Self { connection })
    }
}

fn operation_error(operation: &'static str, key: &str, err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable {
            reason: err.to_string(),
        }
    } else {
        StoreError::Operation {
            operation,
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl TimestampStore for RedisTimestampStore {
    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value.to_string());
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = cmd
            .query_async(&mut connection)
            .await
            .map_err(|e| operation_error("set", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(|e| operation_error("get", key, e))?;

        match raw {
            None => Ok(None),
            Some(text) => match text.trim().parse::<i64>() {
                Ok(value) => Ok(Some(value)),
                Err(_) => {
                    tracing::warn!(key = %key, value = %text, "Ignoring unparseable enqueue timestamp");
                    Ok(None)
                }
            },
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = ::redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(|e| operation_error("delete", key, e))?;
        Ok(())
    }
}
