// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

use std::collections::HashMap;

use ::prometheus::{
    exponential_buckets, linear_buckets, Encoder, HistogramOpts, HistogramVec, Registry,
    TextEncoder,
};

use super::{
    MetricKind, MetricObservation, MetricsSink, LABEL_BACKEND, LABEL_MESSAGE_TYPE,
    LABEL_OPERATION, LABEL_ROLE, LABEL_SOURCE,
};
use crate::error::{CommbenchError, CommbenchResult};
use crate::types::{BackendKind, Role};

const TURNAROUND_METRIC: &str = "queue_turnaround_duration_seconds";

type TimingKey = (BackendKind, Role, MetricKind);

/// Sink backed by a private Prometheus registry.
///
/// Every histogram is registered once in `new`; `observe` only looks them up.
pub struct PrometheusSink {
    registry: Registry,
    turnaround: HistogramVec,
    timings: HashMap<TimingKey, HistogramVec>,
}

fn registration_error(err: ::prometheus::Error) -> CommbenchError {
    CommbenchError::MetricsRegistration {
        message: err.to_string(),
    }
}

impl PrometheusSink {
    pub fn new() -> CommbenchResult<Self> {
        let registry = Registry::new();

        // 10ms .. 1s in 10ms steps
        let turnaround = HistogramVec::new(
            HistogramOpts::new(TURNAROUND_METRIC, "Time from enqueue to consume")
                .buckets(linear_buckets(0.01, 0.01, 100).map_err(registration_error)?),
            &[LABEL_MESSAGE_TYPE, LABEL_SOURCE],
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(turnaround.clone()))
            .map_err(registration_error)?;

        let mut timings = HashMap::new();
        for backend in BackendKind::ALL {
            for role in [Role::Producer, Role::Consumer] {
                for kind in [MetricKind::Latency, MetricKind::ResponseTime] {
                    let name = format!("{}_{}_{}_seconds", backend.name(), role.name(), kind.name());
                    let help = format!("{} {} {}", backend.name(), role.name(), kind.name());
                    let histogram = HistogramVec::new(
                        HistogramOpts::new(name, help).buckets(
                            exponential_buckets(0.0001, 2.0, 15).map_err(registration_error)?,
                        ),
                        &[LABEL_OPERATION],
                    )
                    .map_err(registration_error)?;
                    registry
                        .register(Box::new(histogram.clone()))
                        .map_err(registration_error)?;
                    timings.insert((backend, role, kind), histogram);
                }
            }
        }

        Ok(Self {
            registry,
            turnaround,
            timings,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the text exposition format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
    }

    fn timing_histogram(&self, observation: &MetricObservation) -> Option<&HistogramVec> {
        let backend = observation.label(LABEL_BACKEND)?.parse().ok()?;
        let role = observation.label(LABEL_ROLE)?.parse().ok()?;
        self.timings.get(&(backend, role, observation.kind))
    }
}

impl MetricsSink for PrometheusSink {
    fn observe(&self, observation: MetricObservation) {
        match observation.kind {
            MetricKind::Turnaround => {
                let message_type = observation.label(LABEL_MESSAGE_TYPE).unwrap_or("default");
                let source = observation.label(LABEL_SOURCE).unwrap_or("unknown");
                self.turnaround
                    .with_label_values(&[message_type, source])
                    .observe(observation.value_seconds);
            }
            MetricKind::Latency | MetricKind::ResponseTime => {
                let Some(histogram) = self.timing_histogram(&observation) else {
                    tracing::debug!(kind = observation.kind.name(), "Dropping observation without backend/role labels");
                    return;
                };
                let operation = observation.label(LABEL_OPERATION).unwrap_or("unknown");
                histogram
                    .with_label_values(&[operation])
                    .observe(observation.value_seconds);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turnaround_exposition() {
        let sink = PrometheusSink::new().unwrap();
        sink.observe(MetricObservation::turnaround("default", BackendKind::Redis, 0.05));

        let text = sink.encode();
        assert!(text.contains("queue_turnaround_duration_seconds_count{message_type=\"default\",source=\"redis\"} 1"));
    }

    #[test]
    fn test_timing_exposition() {
        let sink = PrometheusSink::new().unwrap();
        sink.observe(MetricObservation::latency(BackendKind::Kafka, Role::Producer, 0.002));
        sink.observe(MetricObservation::latency(BackendKind::Kafka, Role::Producer, 0.004));

        let text = sink.encode();
        assert!(text.contains("kafka_producer_latency_seconds_count{operation=\"producer-latency\"} 2"));
    }

    #[test]
    fn test_sinks_do_not_share_registries() {
        let a = PrometheusSink::new().unwrap();
        let b = PrometheusSink::new().unwrap();
        a.observe(MetricObservation::turnaround("default", BackendKind::Memory, 0.01));
        assert!(!b.encode().contains("source=\"memory\""));
    }
}
