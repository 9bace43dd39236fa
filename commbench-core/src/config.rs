// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates store, metrics and per-backend settings at boot-up time.
//! Any invalid field results in a HardValidationError that prevents startup.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CommbenchError, CommbenchResult, HardValidationError};
use crate::types::BackendKind;

const DEFAULT_BASE_BACKOFF_MS: u64 = 5_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
const DEFAULT_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 1_000;
const MAX_POLL_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_RECORD_TTL_SECS: u64 = 300;
const DEFAULT_METRICS_PORT: u16 = 9464;

/// Raw store configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawStoreConfig {
    url: String,
    /// 0 disables expiry.
    record_ttl_secs: u64,
}

impl Default for RawStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            record_ttl_secs: DEFAULT_RECORD_TTL_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawMetricsConfig {
    /// 0 disables the exposition endpoint.
    port: u16,
    message_type: String,
}

impl Default for RawMetricsConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_METRICS_PORT,
            message_type: "default".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMaxAttempts {
    Count(u64),
    Keyword(String),
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRetryConfig {
    max_attempts: Option<RawMaxAttempts>,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl Default for RawRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawExhaustedConfig {
    action: String,
    cooldown_ms: u64,
}

impl Default for RawExhaustedConfig {
    fn default() -> Self {
        Self {
            action: "restart".to_string(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawBackendConfig {
    enabled: bool,
    endpoints: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    topic: Option<String>,
    queue: Option<String>,
    group_id: Option<String>,
    prefetch: u32,
    poll_timeout_ms: u64,
    retry: RawRetryConfig,
    on_exhausted: RawExhaustedConfig,
}

impl Default for RawBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoints: Vec::new(),
            username: None,
            password: None,
            topic: None,
            queue: None,
            group_id: None,
            prefetch: 1,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            retry: RawRetryConfig::default(),
            on_exhausted: RawExhaustedConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackends {
    kafka: Option<RawBackendConfig>,
    rabbitmq: Option<RawBackendConfig>,
    redis: Option<RawBackendConfig>,
    memory: Option<RawBackendConfig>,
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    store: RawStoreConfig,
    metrics: RawMetricsConfig,
    backends: RawBackends,
}

/// Upper bound on connection attempts before the supervisor gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    Bounded(u32),
    /// Keep retrying until shutdown.
    Unbounded,
}

impl fmt::Display for MaxAttempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "{}", n),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Exponential backoff policy for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: MaxAttempts,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: MaxAttempts,
        base_backoff: Duration,
        max_backoff: Duration,
    ) -> Result<Self, HardValidationError> {
        if let MaxAttempts::Bounded(0) = max_attempts {
            return Err(HardValidationError::InvalidFieldValue {
                field: "retry.max_attempts",
                value: "0".to_string(),
                reason: "Must be at least 1 or 'unbounded'".to_string(),
            });
        }

        if base_backoff.is_zero() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "retry.base_backoff_ms",
                value: "0".to_string(),
                reason: "Base backoff must be greater than 0".to_string(),
            });
        }

        if max_backoff < base_backoff {
            return Err(HardValidationError::InvalidFieldValue {
                field: "retry.max_backoff_ms",
                value: max_backoff.as_millis().to_string(),
                reason: format!(
                    "Max backoff must be at least the base backoff ({}ms)",
                    base_backoff.as_millis()
                ),
            });
        }

        Ok(Self {
            max_attempts,
            base_backoff,
            max_backoff,
        })
    }

    /// Policy used when a backend's `retry` block omits `max_attempts`.
    pub fn default_for(kind: BackendKind) -> Self {
        let max_attempts = match kind {
            BackendKind::Kafka => MaxAttempts::Bounded(12),
            BackendKind::RabbitMq => MaxAttempts::Bounded(20),
            BackendKind::Redis => MaxAttempts::Unbounded,
            BackendKind::Memory => MaxAttempts::Bounded(3),
        };
        Self {
            max_attempts,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }

    /// Delay before retry number `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether `failures` consecutive failed attempts use up the budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        match self.max_attempts {
            MaxAttempts::Bounded(max) => failures >= max,
            MaxAttempts::Unbounded => false,
        }
    }
}

/// What the hosting loop does once a supervisor reports exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedAction {
    /// Reset the supervisor after `cooldown` and start over.
    Restart { cooldown: Duration },
    /// Stop the component and report the failure.
    Stop,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validated settings for one backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub enabled: bool,
    pub endpoints: Vec<String>,
    pub credentials: Option<Credentials>,
    /// Kafka topic or queue name.
    pub destination: String,
    /// Kafka consumer group.
    pub group_id: Option<String>,
    pub prefetch: u16,
    pub poll_timeout: Duration,
    pub retry: RetryPolicy,
    pub on_exhausted: ExhaustedAction,
}

impl BackendConfig {
    /// Settings used for a backend block with every field omitted.
    pub fn defaults(kind: BackendKind) -> Self {
        let (endpoint, destination) = match kind {
            BackendKind::Kafka => ("localhost:9092", "commbench"),
            BackendKind::RabbitMq => ("amqp://localhost:5672/%2f", "commbench"),
            BackendKind::Redis => ("redis://localhost:6379", "message_queue"),
            BackendKind::Memory => ("memory://local", "loopback"),
        };
        Self {
            kind,
            enabled: true,
            endpoints: vec![endpoint.to_string()],
            credentials: None,
            destination: destination.to_string(),
            group_id: (kind == BackendKind::Kafka).then(|| "commbench".to_string()),
            prefetch: 1,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            retry: RetryPolicy::default_for(kind),
            on_exhausted: ExhaustedAction::Restart {
                cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            },
        }
    }

    /// First configured endpoint. Validation guarantees there is one.
    pub fn primary_endpoint(&self) -> &str {
        self.endpoints.first().map(String::as_str).unwrap_or_default()
    }
}

/// Where enqueue records are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local map; only useful when producer and consumer share a process.
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub record_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// `None` disables the exposition endpoint.
    pub port: Option<u16>,
    pub message_type: String,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
    pub backends: Vec<BackendConfig>,
}

impl Config {
    pub fn backend(&self, kind: BackendKind) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.kind == kind)
    }

    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.iter().filter(|b| b.enabled)
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> CommbenchResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CommbenchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CommbenchError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> CommbenchResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| CommbenchError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> CommbenchResult<Config> {
        let store = Self::validate_store(raw.store)?;
        let metrics = Self::validate_metrics(raw.metrics)?;

        let RawBackends {
            kafka,
            rabbitmq,
            redis,
            memory,
        } = raw.backends;

        let mut backends = Vec::new();
        for (kind, raw_backend) in [
            (BackendKind::Kafka, kafka),
            (BackendKind::RabbitMq, rabbitmq),
            (BackendKind::Redis, redis),
            (BackendKind::Memory, memory),
        ] {
            if let Some(raw_backend) = raw_backend {
                backends.push(Self::validate_backend(kind, raw_backend)?);
            }
        }

        if !backends.iter().any(|b| b.enabled) {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one backend must be enabled".to_string(),
            }
            .into());
        }

        Ok(Config {
            store,
            metrics,
            backends,
        })
    }

    fn validate_store(raw: RawStoreConfig) -> CommbenchResult<StoreConfig> {
        let backend = if raw.url == "memory" {
            StoreBackend::Memory
        } else if raw.url.starts_with("redis://") || raw.url.starts_with("rediss://") {
            StoreBackend::Redis { url: raw.url }
        } else {
            return Err(HardValidationError::InvalidFieldValue {
                field: "store.url",
                value: raw.url,
                reason: "Expected 'memory' or a redis:// URL".to_string(),
            }
            .into());
        };

        let record_ttl =
            (raw.record_ttl_secs > 0).then(|| Duration::from_secs(raw.record_ttl_secs));

        Ok(StoreConfig {
            backend,
            record_ttl,
        })
    }

    fn validate_metrics(raw: RawMetricsConfig) -> CommbenchResult<MetricsConfig> {
        if raw.message_type.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "metrics.message_type",
                value: raw.message_type,
                reason: "Message type label cannot be empty".to_string(),
            }
            .into());
        }

        Ok(MetricsConfig {
            port: (raw.port != 0).then_some(raw.port),
            message_type: raw.message_type,
        })
    }

    /// Validate a single backend block.
    fn validate_backend(kind: BackendKind, raw: RawBackendConfig) -> CommbenchResult<BackendConfig> {
        let context = format!("backend '{}'", kind);
        let defaults = BackendConfig::defaults(kind);

        let endpoints = if raw.endpoints.is_empty() {
            defaults.endpoints
        } else {
            raw.endpoints
        };
        for endpoint in &endpoints {
            Self::validate_endpoint(kind, endpoint)?;
        }

        let credentials = match (raw.username, raw.password) {
            (None, None) => None,
            (Some(username), Some(password)) if !username.is_empty() => Some(Credentials {
                username,
                password,
            }),
            (Some(_), Some(_)) => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "username",
                    value: String::new(),
                    reason: format!("Username cannot be empty in {}", context),
                }
                .into())
            }
            (None, Some(_)) => {
                return Err(HardValidationError::MissingRequiredField {
                    field: "username",
                    context,
                }
                .into())
            }
            (Some(_), None) => {
                return Err(HardValidationError::MissingRequiredField {
                    field: "password",
                    context,
                }
                .into())
            }
        };

        // Kafka names a topic, everything else a queue.
        let (wanted, unwanted, name, stray) = if kind == BackendKind::Kafka {
            ("topic", "queue", raw.topic, raw.queue.is_some())
        } else {
            ("queue", "topic", raw.queue, raw.topic.is_some())
        };
        if stray {
            return Err(HardValidationError::InvalidFieldValue {
                field: unwanted,
                value: context,
                reason: format!("Use '{}' for this backend", wanted),
            }
            .into());
        }
        let destination = name.unwrap_or(defaults.destination);
        if destination.trim().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: wanted,
                context,
            }
            .into());
        }

        let group_id = match (kind, raw.group_id) {
            (BackendKind::Kafka, Some(group)) if group.trim().is_empty() => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "group_id",
                    value: group,
                    reason: "Consumer group cannot be empty".to_string(),
                }
                .into())
            }
            (BackendKind::Kafka, group) => group.or(defaults.group_id),
            (_, Some(group)) => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "group_id",
                    value: group,
                    reason: format!("Only valid for kafka, not {}", context),
                }
                .into())
            }
            (_, None) => None,
        };

        if raw.prefetch == 0 || raw.prefetch > u32::from(u16::MAX) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "prefetch",
                value: raw.prefetch.to_string(),
                reason: "Must be between 1 and 65535".to_string(),
            }
            .into());
        }

        if raw.poll_timeout_ms == 0 || raw.poll_timeout_ms > MAX_POLL_TIMEOUT_MS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "poll_timeout_ms",
                value: raw.poll_timeout_ms.to_string(),
                reason: format!("Must be between 1 and {}", MAX_POLL_TIMEOUT_MS),
            }
            .into());
        }

        let retry = Self::validate_retry(kind, raw.retry)?;
        let on_exhausted = Self::validate_exhausted(raw.on_exhausted)?;

        Ok(BackendConfig {
            kind,
            enabled: raw.enabled,
            endpoints,
            credentials,
            destination,
            group_id,
            prefetch: raw.prefetch as u16,
            poll_timeout: Duration::from_millis(raw.poll_timeout_ms),
            retry,
            on_exhausted,
        })
    }

    fn validate_endpoint(kind: BackendKind, endpoint: &str) -> Result<(), HardValidationError> {
        let invalid = |reason: &str| HardValidationError::InvalidFieldValue {
            field: "endpoints",
            value: endpoint.to_string(),
            reason: reason.to_string(),
        };

        if endpoint.trim().is_empty() {
            return Err(invalid("Endpoint cannot be empty"));
        }

        match kind {
            BackendKind::Kafka => {
                let port = endpoint.rsplit_once(':').map(|(_, port)| port.parse::<u16>());
                match port {
                    Some(Ok(port)) if port != 0 => Ok(()),
                    _ => Err(invalid("Expected host:port")),
                }
            }
            BackendKind::RabbitMq
                if !(endpoint.starts_with("amqp://") || endpoint.starts_with("amqps://")) =>
            {
                Err(invalid("Expected an amqp:// or amqps:// URI"))
            }
            BackendKind::Redis
                if !(endpoint.starts_with("redis://") || endpoint.starts_with("rediss://")) =>
            {
                Err(invalid("Expected a redis:// or rediss:// URL"))
            }
            _ => Ok(()),
        }
    }

    fn validate_retry(kind: BackendKind, raw: RawRetryConfig) -> CommbenchResult<RetryPolicy> {
        let max_attempts = match raw.max_attempts {
            None => RetryPolicy::default_for(kind).max_attempts,
            Some(RawMaxAttempts::Keyword(word)) if word == "unbounded" => MaxAttempts::Unbounded,
            Some(RawMaxAttempts::Keyword(word)) => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "retry.max_attempts",
                    value: word,
                    reason: "Expected a positive integer or 'unbounded'".to_string(),
                }
                .into())
            }
            Some(RawMaxAttempts::Count(n)) => {
                let n = u32::try_from(n).map_err(|_| HardValidationError::InvalidFieldValue {
                    field: "retry.max_attempts",
                    value: n.to_string(),
                    reason: "Too large".to_string(),
                })?;
                MaxAttempts::Bounded(n)
            }
        };

        Ok(RetryPolicy::new(
            max_attempts,
            Duration::from_millis(raw.base_backoff_ms),
            Duration::from_millis(raw.max_backoff_ms),
        )?)
    }

    fn validate_exhausted(raw: RawExhaustedConfig) -> CommbenchResult<ExhaustedAction> {
        match raw.action.as_str() {
            "restart" => Ok(ExhaustedAction::Restart {
                cooldown: Duration::from_millis(raw.cooldown_ms),
            }),
            "stop" => Ok(ExhaustedAction::Stop),
            _ => Err(HardValidationError::InvalidFieldValue {
                field: "on_exhausted.action",
                value: raw.action,
                reason: "Expected 'restart' or 'stop'".to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
store:
  url: redis://127.0.0.1:6379
  record_ttl_secs: 300

metrics:
  port: 9464
  message_type: default

backends:
  kafka:
    endpoints: ["localhost:9092"]
    topic: commbench
    group_id: commbench
    retry:
      max_attempts: 12
      base_backoff_ms: 5000
      max_backoff_ms: 60000
  rabbitmq:
    endpoints: ["amqp://localhost:5672/%2f"]
    username: guest
    password: guest
    queue: commbench
    prefetch: 1
  redis:
    endpoints: ["redis://localhost:6379"]
    queue: message_queue
    on_exhausted:
      action: stop
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.enabled_backends().count(), 3);

        let kafka = config.backend(BackendKind::Kafka).unwrap();
        assert_eq!(kafka.destination, "commbench");
        assert_eq!(kafka.group_id.as_deref(), Some("commbench"));
        assert_eq!(kafka.retry.max_attempts, MaxAttempts::Bounded(12));

        let rabbit = config.backend(BackendKind::RabbitMq).unwrap();
        assert_eq!(rabbit.credentials.as_ref().unwrap().username, "guest");

        let redis = config.backend(BackendKind::Redis).unwrap();
        assert_eq!(redis.on_exhausted, ExhaustedAction::Stop);
        assert_eq!(redis.retry.max_attempts, MaxAttempts::Unbounded);

        assert_eq!(
            config.store.backend,
            StoreBackend::Redis {
                url: "redis://127.0.0.1:6379".to_string()
            }
        );
        assert_eq!(config.store.record_ttl, Some(Duration::from_secs(300)));
        assert_eq!(config.metrics.port, Some(9464));
    }

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
backends:
  memory: {}
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        let memory = config.backend(BackendKind::Memory).unwrap();
        assert_eq!(memory.destination, "loopback");
        assert_eq!(memory.poll_timeout, Duration::from_millis(1000));
        assert_eq!(memory.retry.max_attempts, MaxAttempts::Bounded(3));
        assert_eq!(
            memory.on_exhausted,
            ExhaustedAction::Restart {
                cooldown: Duration::from_secs(5)
            }
        );
        assert_eq!(config.metrics.message_type, "default");
    }

    #[test]
    fn test_no_enabled_backend() {
        let yaml = r#"
backends:
  redis:
    enabled: false
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
        assert!(ConfigLoader::load_string("store: { url: memory }").is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let yaml = r#"
backends:
  nats: {}
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_unbounded_keyword() {
        let yaml = r#"
backends:
  rabbitmq:
    retry: { max_attempts: unbounded }
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(
            config.backend(BackendKind::RabbitMq).unwrap().retry.max_attempts,
            MaxAttempts::Unbounded
        );

        let bad = r#"
backends:
  rabbitmq:
    retry: { max_attempts: forever }
"#;
        assert!(ConfigLoader::load_string(bad).is_err());
    }

    #[test]
    fn test_invalid_backoff() {
        let zero_base = r#"
backends:
  redis:
    retry: { base_backoff_ms: 0 }
"#;
        assert!(ConfigLoader::load_string(zero_base).is_err());

        let inverted = r#"
backends:
  redis:
    retry: { base_backoff_ms: 5000, max_backoff_ms: 1000 }
"#;
        assert!(ConfigLoader::load_string(inverted).is_err());

        let zero_attempts = r#"
backends:
  redis:
    retry: { max_attempts: 0 }
"#;
        assert!(ConfigLoader::load_string(zero_attempts).is_err());
    }

    #[test]
    fn test_invalid_endpoints() {
        let kafka = r#"
backends:
  kafka:
    endpoints: ["localhost"]
"#;
        assert!(ConfigLoader::load_string(kafka).is_err());

        let rabbit = r#"
backends:
  rabbitmq:
    endpoints: ["http://localhost:5672"]
"#;
        assert!(ConfigLoader::load_string(rabbit).is_err());
    }

    #[test]
    fn test_topic_queue_mismatch() {
        let yaml = r#"
backends:
  kafka:
    queue: commbench
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_half_credentials_rejected() {
        let yaml = r#"
backends:
  rabbitmq:
    username: guest
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_prefetch_bounds() {
        let yaml = r#"
backends:
  rabbitmq:
    prefetch: 70000
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_store_url_and_ttl() {
        let yaml = r#"
store: { url: memory, record_ttl_secs: 0 }
backends:
  memory: {}
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.record_ttl, None);

        let bad = r#"
store: { url: "postgres://localhost" }
backends:
  memory: {}
"#;
        assert!(ConfigLoader::load_string(bad).is_err());
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default_for(BackendKind::Kafka);
        let delays: Vec<u64> = (1..=6).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_exhaustion_budget() {
        let bounded = RetryPolicy::default_for(BackendKind::RabbitMq);
        assert!(!bounded.is_exhausted(19));
        assert!(bounded.is_exhausted(20));

        let unbounded = RetryPolicy::default_for(BackendKind::Redis);
        assert!(!unbounded.is_exhausted(u32::MAX));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "guest".to_string(),
            password: "s3cret".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("guest"));
        assert!(!rendered.contains("s3cret"));
    }
}
