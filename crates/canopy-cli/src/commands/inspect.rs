//! Inspect command implementation

use crate::cli::InspectArgs;
use crate::output::OutputWriter;
use crate::output_types::{CellInfo, InspectOutput};
use anyhow::{Context, Result};
use canopy_core::formats::{index_path_for, read_layout, IndexLayout};
use canopy_core::io::BinaryFile;
use canopy_core::models::Aabb;
use canopy_index::morton_decode;
use std::path::{Path, PathBuf};
use tabled::Tabled;

pub fn execute(args: InspectArgs, output: &OutputWriter) -> Result<()> {
    let index = resolve_index(&args.input);
    let layout = read_layout(&index)
        .with_context(|| format!("Failed to read index {}", index.display()))?;

    let summary = summarize(&index, &layout, args.cells);

    if !output.is_json() {
        output.section("Index");
        output.kv("Path", index.display());
        output.kv("Points", summary.point_count);
        output.kv("Cells", summary.cell_count);
        output.kv(
            "Grid",
            format!("{} x {} x {}", summary.grid[0], summary.grid[1], summary.grid[2]),
        );
        output.kv("Randomized", summary.randomized);
        output.kv("Bounds", format_bounds(&summary.bounds));
        output.kv(
            "Points per cell",
            format!("{} - {}", summary.min_cell_points, summary.max_cell_points),
        );

        if args.cells {
            output.section("Cells");
            output.table(summary.cells.iter().map(CellRow::from).collect());
        }
    }

    output.result(summary)
}

/// Accept either the raw file or the index itself
fn resolve_index(input: &Path) -> PathBuf {
    if BinaryFile::file_extension(input) == "idx" {
        input.to_path_buf()
    } else {
        index_path_for(input)
    }
}

fn summarize(index: &Path, layout: &IndexLayout, with_cells: bool) -> InspectOutput {
    let header = &layout.header;
    let counts = layout.cells.iter().map(|c| c.point_count);

    let cells = if with_cells {
        layout
            .cells
            .iter()
            .map(|c| CellInfo {
                code: c.code,
                coordinate: morton_decode(c.code),
                point_count: c.point_count,
                offset: c.offset,
                length: c.length,
                bounds: c.bounds,
            })
            .collect()
    } else {
        Vec::new()
    };

    InspectOutput {
        index: index.display().to_string(),
        point_count: header.point_count,
        cell_count: header.cell_count,
        grid: header.grid,
        randomized: header.is_randomized(),
        bounds: header.bounds,
        min_cell_points: counts.clone().min().unwrap_or(0),
        max_cell_points: counts.max().unwrap_or(0),
        cells,
    }
}

fn format_bounds(bounds: &Aabb) -> String {
    if bounds.is_empty() {
        return "(empty)".to_string();
    }
    format!(
        "({:.3}, {:.3}, {:.3}) - ({:.3}, {:.3}, {:.3})",
        bounds.min[0], bounds.min[1], bounds.min[2], bounds.max[0], bounds.max[1], bounds.max[2]
    )
}

#[derive(Tabled)]
struct CellRow {
    #[tabled(rename = "Code")]
    code: u64,
    #[tabled(rename = "Cell")]
    coordinate: String,
    #[tabled(rename = "Points")]
    point_count: u64,
    #[tabled(rename = "Offset")]
    offset: u64,
    #[tabled(rename = "Bounds")]
    bounds: String,
}

impl From<&CellInfo> for CellRow {
    fn from(cell: &CellInfo) -> Self {
        let [x, y, z] = cell.coordinate;
        Self {
            code: cell.code,
            coordinate: format!("{},{},{}", x, y, z),
            point_count: cell.point_count,
            offset: cell.offset,
            bounds: format_bounds(&cell.bounds),
        }
    }
}
