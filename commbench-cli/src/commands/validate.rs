// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `commbench validate` command - Validate configuration file.

use commbench_core::config::StoreBackend;
use commbench_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Store:");
            match &config.store.backend {
                StoreBackend::Memory => println!("  Backend:    in-process"),
                StoreBackend::Redis { url } => println!("  Backend:    {}", url),
            }
            match config.store.record_ttl {
                Some(ttl) => println!("  Record TTL: {}s", ttl.as_secs()),
                None => println!("  Record TTL: none"),
            }
            println!();
            println!("Metrics:");
            match config.metrics.port {
                Some(port) => println!("  Port:         {}", port),
                None => println!("  Port:         disabled"),
            }
            println!("  Message type: {}", config.metrics.message_type);
            println!();
            println!("Backends ({}):", config.backends.len());
            for backend in &config.backends {
                println!(
                    "  - {} [{}] {} → {} (retry: {} attempts, {}ms..{}ms)",
                    backend.kind,
                    if backend.enabled { "enabled" } else { "disabled" },
                    backend.endpoints.join(","),
                    backend.destination,
                    backend.retry.max_attempts,
                    backend.retry.base_backoff.as_millis(),
                    backend.retry.max_backoff.as_millis()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
