mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pipeline::{RunArgs, SummaryArgs};

/// avo: adversarial variational optimization on a toy Gaussian simulator.
#[derive(Parser)]
#[command(name = "avo", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for running the experiment and inspecting its report.
#[derive(Subcommand)]
enum Command {
    /// Fit the proposal against a critic and write a JSON report.
    Run {
        /// Path to experiment config TOML file.
        #[arg(long, default_value = "configs/toy_gaussian.toml")]
        config: PathBuf,
        /// Path for the output report JSON file.
        #[arg(long, default_value = "report.json")]
        output: PathBuf,
        /// Override the number of epochs.
        #[arg(long)]
        epochs: Option<usize>,
        /// Override the training seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the final proposal and diagnostic statistics of a report.
    Summary {
        /// Path to the report JSON file.
        #[arg(long)]
        input: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            output,
            epochs,
            seed,
        } => pipeline::run_experiment(RunArgs {
            config,
            output,
            epochs,
            seed,
        })
        .map(|_| ()),
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs { input, json }),
    }
}
