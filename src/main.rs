// ABOUTME: Main entry point for rtpool, the realtime subscription pool CLI
//
// Binary: rtpool
// Usage: rtpool [OPTIONS] <COMMAND>
// - demo: simulated workload through the in-memory transport
// - config: print the effective configuration

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    setup_logging(args.json_logs);
    setup_panic_handler();

    let config = cli::load_config(args.config.as_deref())?;

    match args.command {
        cli::Commands::Demo(demo_args) => cli::demo::execute(demo_args, config, args.format).await,
        cli::Commands::Config => cli::config::execute(&config, args.format),
    }
}

fn setup_logging(json: bool) {
    use tracing_subscriber::prelude::*;

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "realtime_pool=info,rtpool=info".into())
    };

    if json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json() // Output in JSON Lines format
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .with(filter())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter())
            .init();
    }
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("rtpool panicked: {}", panic_info);
        eprintln!("rtpool panicked: {panic_info}");
        eprintln!("Run with RUST_LOG=realtime_pool=debug for more details.");
    }));
}
