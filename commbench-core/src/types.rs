// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers and small value types shared by every module.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodecError, HardValidationError};

/// Key prefix under which producers record enqueue timestamps.
pub const ENQUEUE_KEY_PREFIX: &str = "enqueue:";

/// Maximum length accepted for a message identifier.
const MAX_MESSAGE_ID_LEN: usize = 128;

/// Message identifier.
/// Ids built with [`MessageId::new`] must be non-empty, at most 128 bytes,
/// and must not contain the envelope delimiter `:` or whitespace. Ids read
/// off the wire keep whatever the sender put there.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Create a new MessageId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, CodecError> {
        let id = id.into();

        if id.is_empty() {
            return Err(CodecError::InvalidId {
                id,
                reason: "Message ID cannot be empty".to_string(),
            });
        }

        if id.len() > MAX_MESSAGE_ID_LEN {
            let len = id.len();
            return Err(CodecError::InvalidId {
                id,
                reason: format!("Message ID too long: {} bytes (max {})", len, MAX_MESSAGE_ID_LEN),
            });
        }

        if id.chars().any(|c| c == ':' || c.is_whitespace()) {
            return Err(CodecError::InvalidId {
                id,
                reason: "Message ID must not contain ':' or whitespace".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Take an id exactly as it appeared on the wire.
    ///
    /// No validation: whatever precedes the first delimiter is the id, even
    /// when empty or containing whitespace. Such ids simply have no enqueue
    /// record.
    pub fn from_wire(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Generate a fresh, globally unique identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key holding this message's enqueue timestamp.
    pub fn enqueue_key(&self) -> String {
        format!("{}{}", ENQUEUE_KEY_PREFIX, self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Messaging technology under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Kafka,
    #[serde(rename = "rabbitmq")]
    RabbitMq,
    Redis,
    /// In-process broker used for tests and loopback benchmarks.
    Memory,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [Self::Kafka, Self::RabbitMq, Self::Redis, Self::Memory];

    /// Label value used in metrics and logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::RabbitMq => "rabbitmq",
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }

    /// Cargo feature that compiles this backend's adapter, if any.
    pub const fn feature(&self) -> Option<&'static str> {
        match self {
            Self::Kafka => Some("kafka"),
            Self::RabbitMq => Some("rabbitmq"),
            Self::Redis => Some("redis"),
            Self::Memory => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "rabbitmq" | "rabbit" | "amqp" => Ok(Self::RabbitMq),
            "redis" => Ok(Self::Redis),
            "memory" | "loopback" => Ok(Self::Memory),
            _ => Err(HardValidationError::UnknownBackend {
                name: s.to_string(),
            }),
        }
    }
}

/// Which side of a backend a component or metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "producer" => Ok(Self::Producer),
            "consumer" => Ok(Self::Consumer),
            _ => Err(HardValidationError::InvalidFieldValue {
                field: "role",
                value: s.to_string(),
                reason: "Expected 'producer' or 'consumer'".to_string(),
            }),
        }
    }
}

/// How a consumed message is settled with its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeliveryOutcome {
    /// Processing finished; remove the message.
    Ack,
    /// Processing failed transiently; redeliver the message.
    NackRequeue,
    /// The message can never be processed; discard it.
    NackDrop,
}

impl DeliveryOutcome {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::NackRequeue => "nack_requeue",
            Self::NackDrop => "nack_drop",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Enqueue timestamp written by a producer and consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRecord {
    pub id: MessageId,
    /// Wall-clock milliseconds since the Unix epoch at publish time.
    pub enqueued_at_ms: i64,
    /// `None` means the record never expires on its own.
    pub ttl: Option<Duration>,
}

impl EnqueueRecord {
    pub fn new(id: MessageId, enqueued_at_ms: i64, ttl: Option<Duration>) -> Self {
        Self {
            id,
            enqueued_at_ms,
            ttl,
        }
    }

    pub fn key(&self) -> String {
        self.id.enqueue_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_valid() {
        assert!(MessageId::new("abc-123").is_ok());
        assert!(MessageId::new("550e8400-e29b-41d4-a716-446655440000").is_ok());
    }

    #[test]
    fn test_message_id_invalid() {
        assert!(MessageId::new("").is_err());
        assert!(MessageId::new("a:b").is_err());
        assert!(MessageId::new("has space").is_err());
        assert!(MessageId::new("a".repeat(129)).is_err());
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert!(MessageId::new(a.as_str()).is_ok());
    }

    #[test]
    fn test_enqueue_key() {
        let id = MessageId::new("m-1").unwrap();
        assert_eq!(id.enqueue_key(), "enqueue:m-1");
        let record = EnqueueRecord::new(id, 1_000, None);
        assert_eq!(record.key(), "enqueue:m-1");
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("kafka".parse::<BackendKind>().unwrap(), BackendKind::Kafka);
        assert_eq!("RabbitMQ".parse::<BackendKind>().unwrap(), BackendKind::RabbitMq);
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert!("nats".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::RabbitMq.to_string(), "rabbitmq");
    }

    #[test]
    fn test_backend_kind_serde_names() {
        let kind: BackendKind = serde_yaml::from_str("rabbitmq").unwrap();
        assert_eq!(kind, BackendKind::RabbitMq);
    }
}
