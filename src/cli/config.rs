// ABOUTME: CLI config command - print the effective manager configuration

use anyhow::{Context, Result};
use realtime_pool::ManagerConfig;

use super::OutputFormat;

/// Execute the config command
pub fn execute(config: &ManagerConfig, format: OutputFormat) -> Result<()> {
    let rendered = render(config, format)?;
    println!("{rendered}");
    Ok(())
}

fn render(config: &ManagerConfig, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to serialize config as JSON")
        }
        OutputFormat::Text => {
            toml::to_string_pretty(config).context("Failed to serialize config as TOML")
        }
    }
}
