// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Commbench Benchmarking
//!
//! Drives producer and consumer through the in-process backend so the cost
//! of the commbench pipeline itself can be measured without a live broker.
//!
//! # Measurements
//!
//! - **Turnaround**: enqueue-to-consume time as recorded by the consumer
//! - **Publish latency**: time spent in the producer's broker call
//! - **Consume response**: wall time of each consumer processing step
//!
//! Reports are written as JSON for later comparison against broker runs.

pub mod harness;
pub mod metrics;
pub mod reporter;

pub use harness::{HarnessError, LoopbackHarness, LoopbackReport};
pub use metrics::LatencyMetrics;
pub use reporter::{JsonReporter, ReporterError};
