// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Summary statistics for loopback runs.
//!
//! Samples are nanoseconds. Percentiles use the nearest-rank method on the
//! sorted samples.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency distribution of one measured quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub count: usize,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub std_dev_ns: f64,
}

impl LatencyMetrics {
    /// Summarize a set of samples. An empty set gives all zeros.
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let count = samples.len();
        let mean_ns = samples.iter().map(|&s| s as f64).sum::<f64>() / count as f64;
        let variance = samples
            .iter()
            .map(|&s| {
                let diff = s as f64 - mean_ns;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        Self {
            count,
            min_ns: samples[0],
            max_ns: samples[count - 1],
            mean_ns,
            median_ns: percentile(&samples, 50.0),
            p95_ns: percentile(&samples, 95.0),
            p99_ns: percentile(&samples, 99.0),
            std_dev_ns: variance.sqrt(),
        }
    }

    /// Summarize observations recorded in seconds.
    pub fn from_seconds(values: impl IntoIterator<Item = f64>) -> Self {
        Self::from_samples(
            values
                .into_iter()
                .map(|secs| Duration::from_secs_f64(secs.max(0.0)).as_nanos() as u64)
                .collect(),
        )
    }

    /// Format latency in human-readable form (auto-selects ns/μs/ms).
    pub fn format_latency(ns: u64) -> String {
        if ns < 1_000 {
            format!("{}ns", ns)
        } else if ns < 1_000_000 {
            format!("{:.2}μs", ns as f64 / 1_000.0)
        } else if ns < 1_000_000_000 {
            format!("{:.2}ms", ns as f64 / 1_000_000.0)
        } else {
            format!("{:.2}s", ns as f64 / 1_000_000_000.0)
        }
    }
}

/// Nearest-rank percentile of sorted, non-empty samples.
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
