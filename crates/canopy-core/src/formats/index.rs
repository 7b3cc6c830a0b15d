//! Spatially indexed point file.
//!
//! Layout: a fixed header, a table with one entry per non-empty cell, then
//! the point records of every cell stored contiguously in table order.

use std::path::{Path, PathBuf};

use crate::error::{CanopyError, Result};
use crate::formats::bytes::{ByteReader, ByteWriter};
use crate::io::BinaryFile;
use crate::models::{Aabb, CellRecord, POINT_RECORD_SIZE};

pub const INDEX_MAGIC: &[u8; 8] = b"CNPYIDX1";
pub const INDEX_VERSION: u32 = 1;
pub const INDEX_HEADER_SIZE: u64 = 104;
pub const CELL_ENTRY_SIZE: u64 = 80;

/// Header flag: records inside each cell are in random order
pub const FLAG_RANDOMIZED: u32 = 1;

const INDEX_EXTENSION: &str = "idx";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHeader {
    pub point_count: u64,
    pub cell_count: u64,
    pub bounds: Aabb,
    /// Number of grid divisions per axis
    pub grid: [u32; 3],
    pub flags: u32,
}

impl IndexHeader {
    pub fn is_randomized(&self) -> bool {
        self.flags & FLAG_RANDOMIZED != 0
    }

    /// Offset of the first point record
    pub fn data_offset(&self) -> u64 {
        INDEX_HEADER_SIZE + self.cell_count * CELL_ENTRY_SIZE
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.bytes(INDEX_MAGIC)
            .u32(INDEX_VERSION)
            .u32(POINT_RECORD_SIZE as u32)
            .u64(self.point_count)
            .u64(self.cell_count)
            .xyz(self.bounds.min)
            .xyz(self.bounds.max)
            .u32(self.grid[0])
            .u32(self.grid[1])
            .u32(self.grid[2])
            .u32(self.flags)
            .u64(0);
    }

    fn decode(r: &mut ByteReader<'_>, path: &Path) -> Result<Self> {
        if r.bytes(8)? != INDEX_MAGIC {
            return Err(CanopyError::corrupt(path, "not an index file (bad magic)"));
        }
        let version = r.u32()?;
        if version != INDEX_VERSION {
            return Err(CanopyError::corrupt(path, format!("unsupported index version {}", version)));
        }
        let record_size = r.u32()?;
        if record_size as usize != POINT_RECORD_SIZE {
            return Err(CanopyError::corrupt(path, format!("unexpected record size {}", record_size)));
        }
        let point_count = r.u64()?;
        let cell_count = r.u64()?;
        let bounds = Aabb::new(r.xyz()?, r.xyz()?);
        let grid = [r.u32()?, r.u32()?, r.u32()?];
        let flags = r.u32()?;
        r.u64()?;
        Ok(Self { point_count, cell_count, bounds, grid, flags })
    }
}

/// Header plus cell table, everything needed to page cells in on demand
#[derive(Debug, Clone, PartialEq)]
pub struct IndexLayout {
    pub header: IndexHeader,
    pub cells: Vec<CellRecord>,
}

impl IndexLayout {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::default();
        self.header.encode(&mut w);
        for cell in &self.cells {
            w.u64(cell.code)
                .xyz(cell.bounds.min)
                .xyz(cell.bounds.max)
                .u64(cell.offset)
                .u64(cell.length)
                .u64(cell.point_count);
        }
        w.finish()
    }
}

/// Path of the index built for `input` (`plot.raw` -> `plot.raw.idx`)
pub fn index_path_for(input: impl AsRef<Path>) -> PathBuf {
    BinaryFile::append_extension(input, INDEX_EXTENSION)
}

/// Whether an index file exists next to `input`
pub fn has_index(input: impl AsRef<Path>) -> bool {
    BinaryFile::exists(index_path_for(input))
}

/// Write header and cell table at the start of `file`
pub fn write_layout(file: &mut BinaryFile, layout: &IndexLayout) -> Result<()> {
    file.seek(0)?;
    file.write(&layout.encode())
}

/// Read and validate the header and cell table of an index file
///
/// Point records are not touched; cells are read later by byte range.
pub fn read_layout(path: impl AsRef<Path>) -> Result<IndexLayout> {
    let path = path.as_ref();
    let mut file = BinaryFile::open(path)?;
    let size = file.size();
    if size < INDEX_HEADER_SIZE {
        return Err(CanopyError::corrupt(path, "file is shorter than the index header"));
    }

    let data = file.read_vec(INDEX_HEADER_SIZE)?;
    let header = IndexHeader::decode(&mut ByteReader::new(&data, path), path)?;

    let table_bytes = header
        .cell_count
        .checked_mul(CELL_ENTRY_SIZE)
        .filter(|n| *n <= size - INDEX_HEADER_SIZE)
        .ok_or_else(|| CanopyError::corrupt(path, "cell table exceeds file size"))?;

    let table = file.read_vec(table_bytes)?;
    let mut r = ByteReader::new(&table, path);
    let mut cells = Vec::with_capacity(header.cell_count as usize);
    for _ in 0..header.cell_count {
        cells.push(CellRecord {
            code: r.u64()?,
            bounds: Aabb::new(r.xyz()?, r.xyz()?),
            offset: r.u64()?,
            length: r.u64()?,
            point_count: r.u64()?,
        });
    }

    let layout = IndexLayout { header, cells };
    validate(&layout, size, path)?;
    Ok(layout)
}

fn validate(layout: &IndexLayout, size: u64, path: &Path) -> Result<()> {
    let data_offset = layout.header.data_offset();
    let mut total = 0u64;

    for (i, cell) in layout.cells.iter().enumerate() {
        let end = cell.offset.checked_add(cell.length);
        if cell.offset < data_offset || end.map_or(true, |end| end > size) {
            return Err(CanopyError::corrupt(path, format!("cell {} lies outside the file", i)));
        }
        if cell.point_count.checked_mul(POINT_RECORD_SIZE as u64) != Some(cell.length) {
            return Err(CanopyError::corrupt(
                path,
                format!("cell {} length does not match its point count", i),
            ));
        }
        if cell.point_count == 0 || !cell.bounds.is_valid() {
            return Err(CanopyError::corrupt(path, format!("cell {} has invalid bounds", i)));
        }
        total += cell.point_count;
    }

    if total != layout.header.point_count {
        return Err(CanopyError::corrupt(
            path,
            format!("cells hold {} points, header says {}", total, layout.header.point_count),
        ));
    }
    Ok(())
}
