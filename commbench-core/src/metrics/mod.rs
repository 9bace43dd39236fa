// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Metric observations and the sink capability that records them.

use std::collections::BTreeMap;

use crate::types::{BackendKind, Role};

mod prometheus;
mod recording;

pub use self::prometheus::PrometheusSink;
pub use recording::RecordingSink;

pub const LABEL_MESSAGE_TYPE: &str = "message_type";
pub const LABEL_SOURCE: &str = "source";
pub const LABEL_BACKEND: &str = "backend";
pub const LABEL_ROLE: &str = "role";
pub const LABEL_OPERATION: &str = "operation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Time spent in the broker call itself (publish or acknowledge).
    Latency,
    /// Wall time of the whole produce or process step.
    ResponseTime,
    /// Enqueue-to-consume time across processes.
    Turnaround,
}

impl MetricKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::ResponseTime => "response_time",
            Self::Turnaround => "turnaround",
        }
    }
}

/// One recorded value. Labels are kept as a sorted map so sinks and tests
/// see the same shape regardless of insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricObservation {
    pub kind: MetricKind,
    pub labels: BTreeMap<String, String>,
    pub value_seconds: f64,
}

impl MetricObservation {
    pub fn turnaround(message_type: &str, source: BackendKind, value_seconds: f64) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MESSAGE_TYPE.to_string(), message_type.to_string());
        labels.insert(LABEL_SOURCE.to_string(), source.name().to_string());
        Self {
            kind: MetricKind::Turnaround,
            labels,
            value_seconds,
        }
    }

    pub fn latency(backend: BackendKind, role: Role, value_seconds: f64) -> Self {
        Self::timing(MetricKind::Latency, backend, role, value_seconds)
    }

    pub fn response_time(backend: BackendKind, role: Role, value_seconds: f64) -> Self {
        Self::timing(MetricKind::ResponseTime, backend, role, value_seconds)
    }

    fn timing(kind: MetricKind, backend: BackendKind, role: Role, value_seconds: f64) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_BACKEND.to_string(), backend.name().to_string());
        labels.insert(LABEL_ROLE.to_string(), role.name().to_string());
        labels.insert(
            LABEL_OPERATION.to_string(),
            format!("{}-{}", role.name(), kind.name()),
        );
        Self {
            kind,
            labels,
            value_seconds,
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Records observations. Implementations must be cheap and must not block:
/// the consumer calls `observe` on its hot path.
pub trait MetricsSink: Send + Sync {
    fn observe(&self, observation: MetricObservation);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turnaround_labels() {
        let obs = MetricObservation::turnaround("default", BackendKind::RabbitMq, 0.05);
        assert_eq!(obs.kind, MetricKind::Turnaround);
        assert_eq!(obs.label(LABEL_MESSAGE_TYPE), Some("default"));
        assert_eq!(obs.label(LABEL_SOURCE), Some("rabbitmq"));
    }

    #[test]
    fn test_timing_labels() {
        let obs = MetricObservation::response_time(BackendKind::Kafka, Role::Consumer, 0.1);
        assert_eq!(obs.label(LABEL_BACKEND), Some("kafka"));
        assert_eq!(obs.label(LABEL_ROLE), Some("consumer"));
        assert_eq!(obs.label(LABEL_OPERATION), Some("consumer-response_time"));
    }
}
