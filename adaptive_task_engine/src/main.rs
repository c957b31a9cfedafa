//! Main entry point for the Adaptive Task Engine CLI.

use adaptive_task_engine::{batch, cli, settings::Settings, simulation, telemetry};
use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let settings = Settings::load(args.settings.as_deref())?;
    telemetry::init(&settings.logging)?;

    match args.command {
        cli::Commands::Run { config } => batch::run(config, settings).await,
        cli::Commands::Simulate { tasks, seed } => simulation::run(tasks, seed, settings).await,
    }
}
