// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `commbench produce` command - Publish messages on one backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use commbench_core::{store, BackendKind, BackendRegistry, ConfigLoader, MetricKind, RecordingSink};
use tokio_util::sync::CancellationToken;

pub async fn execute(
    config_path: &str,
    backend: &str,
    count: u64,
    concurrency: usize,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind: BackendKind = backend.parse()?;
    let config = ConfigLoader::load_file(config_path)?;

    let timestamps = store::connect(&config.store).await?;
    let sink = Arc::new(RecordingSink::new());
    let registry = Arc::new(BackendRegistry::from_config(&config, timestamps, sink.clone())?);
    if !registry.contains(kind) {
        return Err(format!("Backend '{}' is not enabled in {}", kind, config_path).into());
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    tracing::info!(backend = %kind, count, concurrency, "Producing");
    let remaining = Arc::new(AtomicU64::new(count));
    let failed = Arc::new(AtomicU64::new(0));
    let payload: Arc<[u8]> = Arc::from(payload.as_bytes());
    let started = Instant::now();

    let workers: Vec<_> = (0..concurrency.max(1))
        .map(|_| {
            let registry = Arc::clone(&registry);
            let remaining = Arc::clone(&remaining);
            let failed = Arc::clone(&failed);
            let payload = Arc::clone(&payload);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    if let Err(e) = registry.produce(kind, &payload, &cancel).await {
                        failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(backend = %kind, error = %e, "Produce failed");
                        if cancel.is_cancelled() {
                            break;
                        }
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.await?;
    }
    registry.shutdown_all().await;

    let elapsed = started.elapsed();
    let failed = failed.load(Ordering::Relaxed);
    let attempted = count - remaining.load(Ordering::Relaxed);
    let sent = attempted - failed;

    println!("✓ Produced {} message(s) on {} in {:.3}s", sent, kind, elapsed.as_secs_f64());
    if failed > 0 {
        println!("✗ {} message(s) failed", failed);
    }
    if elapsed.as_secs_f64() > 0.0 {
        println!("  Rate: {:.1} msg/s", sent as f64 / elapsed.as_secs_f64());
    }
    let latencies = sink.of_kind(MetricKind::Latency);
    if !latencies.is_empty() {
        let mean = latencies.iter().map(|o| o.value_seconds).sum::<f64>() / latencies.len() as f64;
        println!("  Mean publish latency: {:.3}ms", mean * 1000.0);
    }

    Ok(())
}
