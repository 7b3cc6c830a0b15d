//! Import command implementation

use crate::cli::ImportArgs;
use crate::config::load_config;
use crate::output::OutputWriter;
use crate::output_types::ImportOutput;
use crate::progress::{create_fraction_bar, finish_error, finish_success, set_fraction};
use anyhow::{Context, Result};
use canopy_core::config::CliConfigOverrides;
use canopy_core::formats::index_path_for;
use canopy_index::SpatialIndexBuilder;
use std::path::Path;
use std::time::Instant;

pub fn execute(args: ImportArgs, config_file: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let overrides = CliConfigOverrides {
        max_cell_points: args.max_cell_points,
        randomize: args.no_randomize.then_some(false),
        ..Default::default()
    };
    let config = load_config(config_file, overrides)?;
    let mut settings = config.builder_settings();
    settings.seed = args.seed;

    let index = args.output.clone().unwrap_or_else(|| index_path_for(&args.input));
    let started = Instant::now();

    let mut builder = SpatialIndexBuilder::start(&index, &args.input, settings)
        .with_context(|| format!("Failed to start import of {}", args.input.display()))?;

    let pb = create_fraction_bar(
        &format!("Indexing {}", args.input.display()),
        output.is_json(),
    );
    while !builder.end() {
        if let Err(err) = builder.next() {
            finish_error(&pb, "Import failed");
            return Err(err).context(format!("Failed to index {}", args.input.display()));
        }
        set_fraction(&pb, builder.percent());
    }
    finish_success(&pb, "Index written");

    let layout = builder.layout().context("Import finished without an index layout")?;
    let header = layout.header;

    output.success(format!(
        "Indexed {} points into {} cells ({} x {} x {} grid)",
        header.point_count, header.cell_count, header.grid[0], header.grid[1], header.grid[2]
    ));
    output.kv("Index", index.display());

    output.result(ImportOutput {
        input: args.input.display().to_string(),
        index: index.display().to_string(),
        point_count: header.point_count,
        cell_count: header.cell_count,
        grid: header.grid,
        randomized: header.is_randomized(),
        elapsed_ms: started.elapsed().as_millis(),
    })
}
