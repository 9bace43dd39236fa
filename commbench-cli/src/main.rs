// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Commbench CLI
//!
//! Command-line interface for the commbench messaging benchmark.

use clap::{Parser, Subcommand};

mod commands;
mod metrics_server;
mod telemetry;

/// Commbench - cross-technology messaging turnaround benchmark
#[derive(Parser)]
#[command(name = "commbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "commbench.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start consumers for every enabled backend and serve metrics
    Up,

    /// Produce messages on one backend
    Produce {
        /// Backend to publish on (kafka, rabbitmq, redis, memory)
        #[arg(short, long)]
        backend: String,

        /// Number of messages
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,

        /// Concurrent producer tasks
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Message payload
        #[arg(short, long, default_value = "ping")]
        payload: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// List configured backends
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    telemetry::init(cli.verbose);

    // Dispatch to command handlers
    match cli.command {
        Commands::Up => commands::up::execute(&cli.config).await,
        Commands::Produce {
            backend,
            count,
            concurrency,
            payload,
        } => commands::produce::execute(&cli.config, &backend, count, concurrency, &payload).await,
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::List => commands::list::execute(&cli.config).await,
    }
}
