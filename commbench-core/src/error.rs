// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for commbench.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.
//! Broker client errors never cross this boundary: every backend adapter
//! folds its native error into a [`TransportFault`] tagged with a [`FaultKind`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::BackendKind;

/// Top-level error type for the benchmark core.
#[derive(Debug, Error)]
pub enum CommbenchError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Connection Lifecycle Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Timestamp store error: {0}")]
    Store(#[from] StoreError),

    #[error("Envelope codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Metrics registration failed: {message}")]
    MetricsRegistration { message: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Backend not configured: {0}")]
    BackendNotConfigured(BackendKind),

    #[error("Backend already registered: {0}")]
    BackendAlreadyRegistered(BackendKind),

    #[error("Consumer already running for backend: {0}")]
    ConsumerAlreadyRunning(BackendKind),

    #[error("Consumer task for {backend} failed: {message}")]
    ConsumerTask {
        backend: BackendKind,
        message: String,
    },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors abort startup.
/// Used when configuration is invalid and the harness cannot safely start.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unknown backend: {name}")]
    UnknownBackend { name: String },

    #[error("Backend {backend} requires the '{feature}' cargo feature")]
    BackendNotCompiled {
        backend: BackendKind,
        feature: &'static str,
    },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// State transition errors for the connection state machine.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for backend {backend}")]
    InvalidTransition {
        backend: BackendKind,
        from: &'static str,
        to: &'static str,
    },
}

/// Backend-agnostic classification of every failure the core can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Retry later: poll timeout, broker briefly unreachable, handshake timeout.
    Transient,
    /// The connection or subscription is unusable and must be rebuilt.
    Fatal,
    /// Input that will never become well-formed.
    Malformed,
    /// A collaborator failed while a message was being processed.
    Processing,
}

impl FaultKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Malformed => "malformed",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified failure reported by a backend adapter.
#[derive(Debug, Clone, Error)]
#[error("{backend} {kind} fault: {message}")]
pub struct TransportFault {
    pub backend: BackendKind,
    pub kind: FaultKind,
    pub message: String,
}

impl TransportFault {
    pub fn new(backend: BackendKind, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind,
            message: message.into(),
        }
    }

    pub fn transient(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::new(backend, FaultKind::Transient, message)
    }

    pub fn fatal(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::new(backend, FaultKind::Fatal, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FaultKind::Fatal
    }
}

/// Errors surfaced by a connection supervisor and the adapters built on it.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("{backend}: retry budget exhausted after {attempts} attempts (last error: {last_error})")]
    Exhausted {
        backend: BackendKind,
        attempts: u32,
        last_error: String,
    },

    #[error("{backend}: operation cancelled by shutdown")]
    Cancelled { backend: BackendKind },

    #[error("{backend}: channel closed before the operation could run")]
    ChannelClosed { backend: BackendKind },

    #[error(transparent)]
    Fault(#[from] TransportFault),
}

impl ConnectionError {
    /// Classify this error for the consumer/producer core.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::Exhausted { .. } => FaultKind::Fatal,
            Self::Cancelled { .. } | Self::ChannelClosed { .. } => FaultKind::Transient,
            Self::Fault(fault) => fault.kind,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Timestamp store failures. A missing key is not an error.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Timestamp store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Timestamp store {operation} failed for key {key}: {reason}")]
    Operation {
        operation: &'static str,
        key: String,
        reason: String,
    },
}

/// Envelope decoding failures. Always classified as [`FaultKind::Malformed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Envelope has no ':' delimiter ({len} bytes)")]
    MissingDelimiter { len: usize },

    #[error("Envelope message id is not valid UTF-8")]
    NonUtf8Id,

    #[error("Invalid message id '{id}': {reason}")]
    InvalidId { id: String, reason: String },
}

/// Result type alias using CommbenchError.
pub type CommbenchResult<T> = Result<T, CommbenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "topic",
            context: "backend 'kafka'".to_string(),
        };
        assert!(err.to_string().contains("topic"));
        assert!(err.to_string().contains("kafka"));
    }

    #[test]
    fn test_error_chain() {
        let validation_err = HardValidationError::UnknownBackend {
            name: "nats".to_string(),
        };
        let err: CommbenchError = validation_err.into();
        assert!(matches!(err, CommbenchError::HardValidation(_)));
    }

    #[test]
    fn test_connection_error_classification() {
        let exhausted = ConnectionError::Exhausted {
            backend: BackendKind::Kafka,
            attempts: 12,
            last_error: "unreachable".to_string(),
        };
        assert_eq!(exhausted.fault_kind(), FaultKind::Fatal);

        let fault: ConnectionError =
            TransportFault::transient(BackendKind::Redis, "poll timeout").into();
        assert_eq!(fault.fault_kind(), FaultKind::Transient);
        assert!(fault.to_string().contains("redis transient fault"));
    }
}
