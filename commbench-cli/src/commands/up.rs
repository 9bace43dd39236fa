// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `commbench up` command - Run consumers until Ctrl+C.
//!
//! Starts one consumer loop per enabled backend plus the metrics endpoint,
//! then cancels and joins everything on shutdown.

use std::sync::Arc;

use commbench_core::{store, BackendRegistry, ConfigLoader, NoopHandler, PrometheusSink};
use tokio_util::sync::CancellationToken;

use crate::metrics_server;

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config = %config_path, "Starting consumers");

    // Load and validate configuration - fail fast on invalid config
    let config = ConfigLoader::load_file(config_path)?;

    let timestamps = store::connect(&config.store).await?;
    let sink = Arc::new(PrometheusSink::new()?);
    let registry = BackendRegistry::from_config(&config, timestamps, sink.clone())?;

    let server_cancel = CancellationToken::new();
    let server = match config.metrics.port {
        Some(port) => Some(metrics_server::start(Arc::clone(&sink), port, server_cancel.clone()).await?),
        None => None,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                   COMMBENCH CONSUMERS                        ║");
    println!("╠══════════════════════════════════════════════════════════════╣");

    let mut handles = Vec::new();
    for kind in registry.backends() {
        match registry.start_consumer(kind, Arc::new(NoopHandler)) {
            Ok(handle) => {
                let destination = registry
                    .config(kind)
                    .map(|c| c.destination)
                    .unwrap_or_default();
                println!("║ ● {:<10} → {:<46} ║", kind.name(), destination);
                handles.push(handle);
            }
            Err(e) => {
                println!("║ ✗ {:<10} {:<48} ║", kind.name(), e);
                tracing::error!(backend = %kind, error = %e, "Failed to start consumer");
            }
        }
    }

    println!("╚══════════════════════════════════════════════════════════════╝");
    if let Some(port) = config.metrics.port {
        println!("Metrics: http://localhost:{}/metrics", port);
    }
    println!();
    println!("Press Ctrl+C to stop...");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    println!();
    println!("Shutting down...");
    registry.shutdown_all().await;

    for handle in handles {
        let kind = handle.backend();
        match handle.join().await {
            Ok(stats) => println!(
                "  {:<10} received {}, acked {}, requeued {}, dropped {}, unmatched {}",
                kind.name(),
                stats.received,
                stats.acked,
                stats.requeued,
                stats.dropped,
                stats.unmatched
            ),
            Err(e) => println!("  {:<10} stopped with error: {}", kind.name(), e),
        }
    }

    server_cancel.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }

    println!("Consumers stopped.");
    Ok(())
}
