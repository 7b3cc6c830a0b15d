//! Command implementations

mod config;
mod generate;
mod import;
mod inspect;
mod view;

use crate::cli::{Cli, Commands};
use crate::output::OutputWriter;
use anyhow::Result;

/// Execute a CLI command
pub fn execute(cli: Cli) -> Result<()> {
    let output = OutputWriter::new(cli.json);
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Generate(args) => generate::execute(args, &output),
        Commands::Import(args) => import::execute(args, config_file, &output),
        Commands::Inspect(args) => inspect::execute(args, &output),
        Commands::View(args) => view::execute(args, config_file, &output),
        Commands::Config => config::execute(config_file, &output),
    }
}
