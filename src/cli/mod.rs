// ABOUTME: CLI argument parsing and command routing for rtpool
//
// Provides command-line interface for:
// - Driving a simulated workload through the manager (demo)
// - Printing the effective configuration (config)

pub mod config;
pub mod demo;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use realtime_pool::ManagerConfig;

/// Pooled realtime subscriptions - exercise and inspect the manager
#[derive(Parser)]
#[command(name = "rtpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Config file (default: ./.realtime-pool/config.toml, then ~/.realtime-pool/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulated workload against the in-memory transport
    Demo(DemoArgs),

    /// Print the effective configuration
    Config,
}

/// Arguments for the demo command
#[derive(clap::Args)]
pub struct DemoArgs {
    /// Number of subscribing features
    #[arg(long, default_value = "8")]
    pub features: usize,

    /// Change-event bursts to emit
    #[arg(long, default_value = "5")]
    pub bursts: usize,

    /// Events per resource in each burst
    #[arg(long, default_value = "10")]
    pub burst_size: usize,

    /// Simulated channel open latency in milliseconds
    #[arg(long, default_value = "50")]
    pub latency_ms: u64,

    /// Make the first N channel opens fail
    #[arg(long, default_value = "0")]
    pub fail_first: usize,

    /// Drop connectivity between bursts
    #[arg(long)]
    pub flap: bool,
}

/// Load the configuration from `path`, or from the default locations
pub fn load_config(path: Option<&Path>) -> Result<ManagerConfig> {
    match path {
        Some(path) => ManagerConfig::from_file(path),
        None => ManagerConfig::load(),
    }
}
