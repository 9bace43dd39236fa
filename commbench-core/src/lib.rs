//! Commbench Core Library
//!
//! Resilient producer/consumer core for the commbench messaging benchmark.
//! Provides per-backend connection supervision with retry/backoff, enqueue
//! timestamp correlation, the wire envelope codec, metric sinks, and the
//! Kafka, RabbitMQ, Redis and in-process backend adapters.

pub mod backends;
pub mod clock;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod registry;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{DelimitedCodec, Envelope, MessageCodec};
pub use config::{BackendConfig, Config, ConfigLoader, ExhaustedAction, MaxAttempts, RetryPolicy};
pub use consumer::{Consumer, ConsumerSettings, ConsumerStats, MessageHandler, NoopHandler};
pub use error::{
    CodecError, CommbenchError, CommbenchResult, ConnectionError, FaultKind, HardValidationError,
    StoreError, TransportFault,
};
pub use metrics::{MetricKind, MetricObservation, MetricsSink, PrometheusSink, RecordingSink};
pub use producer::Producer;
pub use registry::{BackendRegistry, ConsumerHandle, RegistryOptions};
pub use state::{ConnectionState, ConnectionStateMachine};
pub use store::{MemoryTimestampStore, TimestampStore};
pub use supervisor::ConnectionSupervisor;
pub use types::{BackendKind, DeliveryOutcome, EnqueueRecord, MessageId, Role};
