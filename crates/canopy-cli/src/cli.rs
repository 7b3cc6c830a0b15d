use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Canopy - out-of-core point cloud indexing and cell cache
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(about = "Out-of-core point cloud indexing and cell cache", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to ./canopy.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a synthetic raw point file
    Generate(GenerateArgs),

    /// Build the spatial index of a raw point file
    Import(ImportArgs),

    /// Show the header and cell table of an index
    Inspect(InspectArgs),

    /// Open indexed files in an editor session and load their cells
    View(ViewArgs),

    /// Show the effective configuration and where each value comes from
    Config,
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Output raw point file
    pub output: PathBuf,

    /// Number of points
    #[arg(long, short = 'n', default_value = "100000")]
    pub points: u64,

    /// Random seed
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Plot extent along x, y and z
    #[arg(long, value_name = "X,Y,Z", value_delimiter = ',', num_args = 3, default_values_t = [100.0, 100.0, 30.0])]
    pub size: Vec<f64>,
}

#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Raw point file to index
    pub input: PathBuf,

    /// Index path (defaults to <input>.idx)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Keep the input order inside each cell
    #[arg(long)]
    pub no_randomize: bool,

    /// Seed for the in-cell shuffle
    #[arg(long)]
    pub seed: Option<u64>,

    /// Target number of points per cell
    #[arg(long)]
    pub max_cell_points: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Raw point file or its index
    pub input: PathBuf,

    /// Print every cell, not only a summary
    #[arg(long)]
    pub cells: bool,
}

#[derive(Parser, Debug)]
pub struct ViewArgs {
    /// Indexed raw point files
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Clip box
    #[arg(long, value_name = "MINX,MINY,MINZ,MAXX,MAXY,MAXZ", value_delimiter = ',', num_args = 6)]
    pub clip: Option<Vec<f64>>,

    /// Load cells nearest to this point first
    #[arg(long, value_name = "X,Y,Z", value_delimiter = ',', num_args = 3)]
    pub focus: Option<Vec<f64>>,

    /// Draw only these classification codes (default: 2 to 15)
    #[arg(long, value_name = "CLASS,...", value_delimiter = ',')]
    pub classes: Option<Vec<u8>>,

    /// Maximum number of resident cells
    #[arg(long)]
    pub max_cells: Option<usize>,

    /// Number of loader threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Seconds to wait for loading to settle
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}
