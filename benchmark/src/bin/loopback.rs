// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run a loopback round-trip benchmark and save a JSON report.

use clap::Parser;
use commbench_benchmark::{JsonReporter, LatencyMetrics, LoopbackHarness};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loopback")]
#[command(about = "Measure commbench pipeline overhead through the in-process broker")]
struct Args {
    /// Output directory for reports
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// Messages to round-trip
    #[arg(short = 'n', long, default_value_t = 10_000)]
    messages: u64,

    /// Concurrent producer workers
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Payload size in bytes
    #[arg(short, long, default_value_t = 64)]
    payload_bytes: usize,

    /// Seconds to wait for the consumer to drain
    #[arg(long, default_value_t = 60)]
    deadline_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("Commbench Loopback Benchmark");
    println!("============================");
    println!(
        "Messages: {}  Concurrency: {}  Payload: {}B",
        args.messages, args.concurrency, args.payload_bytes
    );
    println!();

    let report = LoopbackHarness::new()
        .messages(args.messages)
        .concurrency(args.concurrency)
        .payload_bytes(args.payload_bytes)
        .deadline(Duration::from_secs(args.deadline_secs))
        .run()
        .await?;

    println!(
        "Elapsed {:.1}ms, {:.0} msg/s, {} acked",
        report.elapsed_ms, report.throughput_msgs_per_sec, report.acked
    );
    print_row("turnaround", &report.turnaround);
    print_row("publish", &report.publish_latency);
    print_row("consume", &report.consume_response);

    let path = JsonReporter::new(&args.output)?.save(&report)?;
    println!();
    println!("Report saved to: {:?}", path);
    Ok(())
}

fn print_row(name: &str, metrics: &LatencyMetrics) {
    println!(
        "  {:<12} p50 {:>10}  p95 {:>10}  p99 {:>10}  max {:>10}",
        name,
        LatencyMetrics::format_latency(metrics.median_ns),
        LatencyMetrics::format_latency(metrics.p95_ns),
        LatencyMetrics::format_latency(metrics.p99_ns),
        LatencyMetrics::format_latency(metrics.max_ns),
    );
}
