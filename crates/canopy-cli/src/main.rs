//! Canopy CLI
//!
//! Generates raw point files, builds their spatial index, and opens them in
//! an editor session to exercise the cell cache.

mod cli;
mod commands;
mod config;
mod output;
mod output_types;
mod progress;

use clap::Parser;
use cli::Cli;
use output::OutputWriter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = commands::execute(cli) {
        OutputWriter::new(json).error(format!("{:#}", err));
        std::process::exit(1);
    }
}
