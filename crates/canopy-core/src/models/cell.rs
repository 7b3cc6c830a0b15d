use serde::{Deserialize, Serialize};
use std::fmt;

use super::bounds::Aabb;
use super::dataset::DataSetId;
use super::point::Point;

/// Stable handle of a cell slot in the cache arena
///
/// Handles survive eviction; only the payload is released. Readers re-resolve
/// handles after every cancel/restart boundary instead of keeping references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellHandle(pub u32);

impl CellHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Location and extent of one cell inside an indexed file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    /// Morton code of the grid cell (also the file order)
    pub code: u64,

    /// Tight bounds of the points stored in the cell
    pub bounds: Aabb,

    /// Byte offset of the first record
    pub offset: u64,

    /// Byte length of the cell's records
    pub length: u64,

    /// Number of point records
    pub point_count: u64,
}

/// Load state of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    Unloaded,
    Loading,
    Loaded,
}

/// Spatial partition of one dataset's points
#[derive(Debug, Clone)]
pub struct Cell {
    /// Owning dataset
    pub data_set: DataSetId,

    /// On-disk location, retained across eviction
    pub record: CellRecord,

    pub(crate) state: CellState,
    /// Owned by the cell alone so eviction frees it
    pub(crate) points: Option<Box<[Point]>>,
}

impl Cell {
    pub fn new(data_set: DataSetId, record: CellRecord) -> Self {
        Self { data_set, record, state: CellState::Unloaded, points: None }
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn bounds(&self) -> &Aabb {
        &self.record.bounds
    }

    pub fn point_count(&self) -> u64 {
        self.record.point_count
    }

    /// Point buffer, present only while Loaded
    ///
    /// The slice borrows the cell; callers that need the points past the
    /// next mutation copy them.
    pub fn points(&self) -> Option<&[Point]> {
        self.points.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == CellState::Loaded
    }

    pub fn mark_loading(&mut self) {
        self.state = CellState::Loading;
    }

    /// Install a freshly read buffer; the buffer is immutable from here on
    pub fn mark_loaded(&mut self, points: Vec<Point>) {
        self.points = Some(points.into_boxed_slice());
        self.state = CellState::Loaded;
    }

    /// Release the buffer and return to Unloaded
    pub fn unload(&mut self) {
        self.points = None;
        self.state = CellState::Unloaded;
    }
}
