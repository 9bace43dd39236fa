// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Static table from backend kind to its wiring.
//!
//! Building a backend never touches the network: supervisors connect lazily
//! on the first publish or receive.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::BackendConfig;
use crate::error::CommbenchResult;
use crate::state::ConnectionState;
use crate::transport::{Publisher, Receiver};
use crate::types::{BackendKind, Role};

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryBroker;

/// Creates a fresh receiver bound to the backend's consumer supervisor.
pub type ReceiverFactory = Arc<dyn Fn() -> Box<dyn Receiver> + Send + Sync>;

/// Everything the registry needs from one backend.
pub struct BackendParts {
    pub publisher: Arc<dyn Publisher>,
    pub receivers: ReceiverFactory,
    /// Connection state per role. Roles sharing one supervisor report the
    /// same state.
    pub states: Vec<(Role, watch::Receiver<ConnectionState>)>,
}

/// Whether this build carries the adapter for `kind`.
pub const fn is_compiled(kind: BackendKind) -> bool {
    match kind {
        BackendKind::Kafka => cfg!(feature = "kafka"),
        BackendKind::RabbitMq => cfg!(feature = "rabbitmq"),
        BackendKind::Redis => cfg!(feature = "redis"),
        BackendKind::Memory => true,
    }
}

#[cfg(not(all(feature = "kafka", feature = "rabbitmq", feature = "redis")))]
fn not_compiled(kind: BackendKind) -> crate::error::CommbenchError {
    crate::error::HardValidationError::BackendNotCompiled {
        backend: kind,
        feature: kind.feature().unwrap_or("default"),
    }
    .into()
}

pub fn build(config: &BackendConfig) -> CommbenchResult<BackendParts> {
    match config.kind {
        BackendKind::Memory => Ok(memory::build(config, MemoryBroker::new(BackendKind::Memory))),

        #[cfg(feature = "redis")]
        BackendKind::Redis => Ok(self::redis::build(config)),
        #[cfg(not(feature = "redis"))]
        BackendKind::Redis => Err(not_compiled(BackendKind::Redis)),

        #[cfg(feature = "rabbitmq")]
        BackendKind::RabbitMq => Ok(rabbitmq::build(config)),
        #[cfg(not(feature = "rabbitmq"))]
        BackendKind::RabbitMq => Err(not_compiled(BackendKind::RabbitMq)),

        #[cfg(feature = "kafka")]
        BackendKind::Kafka => Ok(kafka::build(config)),
        #[cfg(not(feature = "kafka"))]
        BackendKind::Kafka => Err(not_compiled(BackendKind::Kafka)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_always_compiled() {
        assert!(is_compiled(BackendKind::Memory));
    }

    #[cfg(not(feature = "kafka"))]
    #[test]
    fn test_missing_feature_is_a_validation_error() {
        use crate::error::{CommbenchError, HardValidationError};

        let config = BackendConfig::defaults(BackendKind::Kafka);
        let err = build(&config).err().unwrap();
        assert!(matches!(
            err,
            CommbenchError::HardValidation(HardValidationError::BackendNotCompiled { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_agrees_with_is_compiled() {
        for kind in BackendKind::ALL {
            let built = build(&BackendConfig::defaults(kind));
            assert_eq!(built.is_ok(), is_compiled(kind), "backend {}", kind);
        }
    }

    #[tokio::test]
    async fn test_build_does_not_connect() {
        let parts = build(&BackendConfig::defaults(BackendKind::Memory)).unwrap();
        assert_eq!(parts.states.len(), 2);
        assert_eq!(*parts.states[0].1.borrow(), ConnectionState::Disconnected);
    }
}
