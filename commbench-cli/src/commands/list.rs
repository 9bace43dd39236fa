// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `commbench list` command - List backends from configuration.

use commbench_core::backends::is_compiled;
use commbench_core::{ConfigLoader, ExhaustedAction};

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;

    println!("╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                           CONFIGURED BACKENDS                                ║");
    println!("╠════════════╦══════════╦═══════════════════╦═══════════╦══════════════════════╣");
    println!("║ Backend    ║ Status   ║ Destination       ║ Attempts  ║ On exhausted         ║");
    println!("╠════════════╬══════════╬═══════════════════╬═══════════╬══════════════════════╣");

    for backend in &config.backends {
        let status = if !is_compiled(backend.kind) {
            "missing"
        } else if backend.enabled {
            "enabled"
        } else {
            "disabled"
        };
        let on_exhausted = match backend.on_exhausted {
            ExhaustedAction::Restart { cooldown } => format!("restart after {}ms", cooldown.as_millis()),
            ExhaustedAction::Stop => "stop".to_string(),
        };

        println!(
            "║ {:<10} ║ {:<8} ║ {:<17} ║ {:<9} ║ {:<20} ║",
            backend.kind.name(),
            status,
            backend.destination,
            backend.retry.max_attempts.to_string(),
            on_exhausted
        );
    }

    println!("╚════════════╩══════════╩═══════════════════╩═══════════╩══════════════════════╝");
    println!();
    println!("Total: {} backend(s)", config.backends.len());

    Ok(())
}
