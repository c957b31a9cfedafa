//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Adaptive Task Engine CLI
#[derive(Parser)]
#[command(name = "task-engine-cli")]
#[command(about = "Load-forecasting scheduler with a learned cache and knowledge sharing")]
#[command(version)]
pub struct Cli {
    /// Engine settings file layered over the built-in defaults
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a batch job from configuration file
    Run {
        /// Path to the batch configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Process randomly generated tasks over the built-in city roster
    Simulate {
        /// Number of tasks to generate
        #[arg(short, long, default_value_t = 20)]
        tasks: usize,
        /// Seed for task generation
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}
