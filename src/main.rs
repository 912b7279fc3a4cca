use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod backend;
mod config;
mod imaging;
mod models;
mod output;
mod prompting;
mod runner;
mod scoring;

use crate::config::Config;
use crate::models::Dataset;
use crate::output::OutputFormat;
use crate::runner::Runner;

/// Multiple-choice VQA evaluation - run samples against a vision-language model and score accuracy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML run configuration file
    run_file: PathBuf,

    /// Output format for the final summary: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - enables debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

/// Logging goes to stderr; stdout is reserved for the summary.
/// RUST_LOG overrides the level picked from --verbose.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::from_file(&args.run_file)?;
    let dataset = Dataset::load(Path::new(&config.data_path))?;
    tracing::info!(samples = dataset.len(), model = %config.model.name, "Starting evaluation");

    let mut runner = Runner::new(config)?;
    let summary = runner.run(&dataset).await?;

    output::print_summary(&summary, args.output);

    Ok(())
}
