// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON persistence for loopback reports.

use crate::harness::LoopbackReport;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Report I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Writes reports as `loopback_<epoch-ms>.json` under one directory.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create the reporter, creating `output_dir` if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn save(&self, report: &LoopbackReport) -> Result<PathBuf, ReporterError> {
        let path = self
            .output_dir
            .join(format!("loopback_{}.json", report.generated_at_ms));
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, report)?;
        Ok(path)
    }

    /// Saved reports, oldest first.
    pub fn list_reports(&self) -> Result<Vec<PathBuf>, ReporterError> {
        let mut reports = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                reports.push(path);
            }
        }
        reports.sort();
        Ok(reports)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<LoopbackReport, ReporterError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LatencyMetrics;
    use tempfile::TempDir;

    fn report(generated_at_ms: i64) -> LoopbackReport {
        LoopbackReport {
            messages: 3,
            concurrency: 1,
            payload_bytes: 8,
            elapsed_ms: 1.5,
            throughput_msgs_per_sec: 2000.0,
            acked: 3,
            turnaround: LatencyMetrics::from_samples(vec![0, 0, 1_000_000]),
            publish_latency: LatencyMetrics::from_samples(vec![100, 200, 300]),
            consume_response: LatencyMetrics::default(),
            generated_at_ms,
        }
    }

    #[test]
    fn test_reporter_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path()).unwrap();

        let path = reporter.save(&report(1_700_000_000_000)).unwrap();
        assert!(path.ends_with("loopback_1700000000000.json"));

        let loaded = JsonReporter::load(&path).unwrap();
        assert_eq!(loaded.acked, 3);
        assert_eq!(loaded.turnaround.max_ns, 1_000_000);
    }

    #[test]
    fn test_list_reports_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path().join("nested")).unwrap();

        reporter.save(&report(2)).unwrap();
        reporter.save(&report(1)).unwrap();
        fs::write(temp_dir.path().join("nested").join("notes.txt"), "x").unwrap();

        let reports = reporter.list_reports().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].ends_with("loopback_1.json"));
    }
}
