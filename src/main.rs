//! # gamesync
//!
//! Entry point: loads configuration, installs tracing and runs one command
//! inside its own run context.

use anyhow::{Context, Result};
use clap::Parser;
use gamesync::{
    cli::{self, Cli},
    config::ConfigLoader,
    telemetry::{RunContext, init_tracing, with_run_context},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config).context("initializing telemetry")?;

    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(profile = %config.profile, config = %redacted, "Configuration loaded");
    }

    let context = RunContext::new(cli.command.name());
    let run_id = context.run_id.clone();
    tracing::info!(run_id = %run_id, command = context.command, "Starting run");

    with_run_context(context, cli::run(cli, config)).await
}
