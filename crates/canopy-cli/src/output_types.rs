use canopy_core::models::Aabb;
use canopy_store::DatabaseStats;
use serde::Serialize;

/// Output for generate command
#[derive(Debug, Serialize)]
pub struct GenerateOutput {
    pub path: String,
    pub point_count: u64,
    pub bounds: Aabb,
}

/// Output for import command
#[derive(Debug, Serialize)]
pub struct ImportOutput {
    pub input: String,
    pub index: String,
    pub point_count: u64,
    pub cell_count: u64,
    pub grid: [u32; 3],
    pub randomized: bool,
    pub elapsed_ms: u128,
}

/// Output for inspect command
#[derive(Debug, Serialize)]
pub struct InspectOutput {
    pub index: String,
    pub point_count: u64,
    pub cell_count: u64,
    pub grid: [u32; 3],
    pub randomized: bool,
    pub bounds: Aabb,
    pub min_cell_points: u64,
    pub max_cell_points: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellInfo>,
}

#[derive(Debug, Serialize)]
pub struct CellInfo {
    pub code: u64,
    pub coordinate: [u32; 3],
    pub point_count: u64,
    pub offset: u64,
    pub length: u64,
    pub bounds: Aabb,
}

/// Output for view command
#[derive(Debug, Serialize)]
pub struct ViewOutput {
    pub settled: bool,
    pub max_cells: usize,
    pub resident_cells: usize,
    pub high_water: usize,
    pub classes: Vec<u8>,
    pub stats: DatabaseStats,
    pub datasets: Vec<DataSetView>,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DataSetView {
    pub id: u64,
    pub name: String,
    pub cells: usize,
    pub loaded_cells: usize,
    pub loaded_points: u64,
    /// Loaded points whose class is enabled
    pub visible_points: u64,
    pub point_count: u64,
}

/// One entry of the config command
#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub source: String,
}
