//! Byte-range reads of single cells.

use std::path::{Path, PathBuf};

use canopy_core::error::{CanopyError, Result};
use canopy_core::io::BinaryFile;
use canopy_core::models::{Aabb, CellHandle, DataSetId, Point, POINT_RECORD_SIZE};

/// Everything needed to read one cell without holding the database lock
///
/// Issued by [`crate::Database::begin_load`] and handed back to
/// [`crate::Database::finish_load`] or [`crate::Database::abort_load`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTicket {
    pub handle: CellHandle,
    pub data_set: DataSetId,
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
    pub point_count: u64,
    pub bounds: Aabb,
    pub(crate) generation: u64,
}

impl LoadTicket {
    /// Read and decode exactly the cell's byte range
    ///
    /// Records that are not finite or fall outside the recorded cell bounds
    /// are reported as `Corrupt`.
    pub fn read(&self) -> Result<Vec<Point>> {
        if self.point_count.checked_mul(POINT_RECORD_SIZE as u64) != Some(self.length) {
            return Err(CanopyError::corrupt(&self.path, "cell length does not match point count"));
        }

        let mut file = BinaryFile::open(&self.path)?;
        file.seek(self.offset)?;
        let data = file.read_vec(self.length)?;
        let points = Point::decode_all(&data);

        if let Some(i) = points.iter().position(|p| !p.is_finite() || !self.bounds.contains(p.position()))
        {
            return Err(corrupt_record(&self.path, self.handle, i));
        }
        Ok(points)
    }
}

fn corrupt_record(path: &Path, handle: CellHandle, index: usize) -> CanopyError {
    CanopyError::corrupt(path, format!("cell {} record {} lies outside the cell bounds", handle, index))
}
