//! Raw point file: a fixed header followed by unordered point records.

use std::path::{Path, PathBuf};

use crate::error::{CanopyError, Result};
use crate::formats::bytes::{ByteReader, ByteWriter};
use crate::io::BinaryFile;
use crate::models::{Aabb, Point, POINT_RECORD_SIZE};

pub const RAW_MAGIC: &[u8; 8] = b"CNPYRAW1";
pub const RAW_VERSION: u32 = 1;
pub const RAW_HEADER_SIZE: u64 = 80;

/// Header of a raw point file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHeader {
    pub point_count: u64,
    pub bounds: Aabb,
}

impl RawHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::default();
        w.bytes(RAW_MAGIC)
            .u32(RAW_VERSION)
            .u32(POINT_RECORD_SIZE as u32)
            .u64(self.point_count)
            .xyz(self.bounds.min)
            .xyz(self.bounds.max)
            .u64(0);
        w.finish()
    }

    /// Parse and validate a header against the size of its file
    pub fn decode(data: &[u8], file_size: u64, path: &Path) -> Result<Self> {
        let mut r = ByteReader::new(data, path);
        if r.bytes(8)? != RAW_MAGIC {
            return Err(CanopyError::corrupt(path, "not a raw point file (bad magic)"));
        }
        let version = r.u32()?;
        if version != RAW_VERSION {
            return Err(CanopyError::corrupt(path, format!("unsupported version {}", version)));
        }
        let record_size = r.u32()?;
        if record_size as usize != POINT_RECORD_SIZE {
            return Err(CanopyError::corrupt(path, format!("unexpected record size {}", record_size)));
        }
        let point_count = r.u64()?;
        let bounds = Aabb::new(r.xyz()?, r.xyz()?);

        if point_count > 0 && !bounds.is_valid() {
            return Err(CanopyError::corrupt(path, "header bounds are not valid"));
        }

        let expected = point_count
            .checked_mul(POINT_RECORD_SIZE as u64)
            .and_then(|n| n.checked_add(RAW_HEADER_SIZE))
            .ok_or_else(|| CanopyError::corrupt(path, "point count overflows"))?;
        if expected != file_size {
            return Err(CanopyError::corrupt(
                path,
                format!("file size {} does not match {} points", file_size, point_count),
            ));
        }

        Ok(Self { point_count, bounds })
    }

    /// Open `path` and read its header
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = BinaryFile::open(path)?;
        Self::read_from(&mut file)
    }

    fn read_from(file: &mut BinaryFile) -> Result<Self> {
        if file.size() < RAW_HEADER_SIZE {
            return Err(CanopyError::corrupt(file.path(), "file is shorter than its header"));
        }
        file.seek(0)?;
        let data = file.read_vec(RAW_HEADER_SIZE)?;
        Self::decode(&data, file.size(), file.path())
    }
}

/// Sequential batch reader over a raw point file
#[derive(Debug)]
pub struct RawPointReader {
    file: BinaryFile,
    header: RawHeader,
    read: u64,
}

impl RawPointReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = BinaryFile::open(path)?;
        let header = RawHeader::read_from(&mut file)?;
        Ok(Self { file, header, read: 0 })
    }

    pub fn header(&self) -> &RawHeader {
        &self.header
    }

    /// Number of points already returned
    pub fn position(&self) -> u64 {
        self.read
    }

    pub fn remaining(&self) -> u64 {
        self.header.point_count - self.read
    }

    /// Read up to `max` points; an empty batch means the file is exhausted
    ///
    /// Points that are not finite or lie outside the header bounds are
    /// reported as `Corrupt`.
    pub fn read_batch(&mut self, max: u64) -> Result<Vec<Point>> {
        let count = self.remaining().min(max);
        let data = self.file.read_vec(count * POINT_RECORD_SIZE as u64)?;
        let points = Point::decode_all(&data);

        for (i, p) in points.iter().enumerate() {
            if !p.is_finite() || !self.header.bounds.contains(p.position()) {
                return Err(CanopyError::corrupt(
                    self.file.path(),
                    format!(
                        "point {} at ({}, {}, {}) lies outside the header bounds",
                        self.read + i as u64,
                        p.x,
                        p.y,
                        p.z
                    ),
                ));
            }
        }

        self.read += count;
        Ok(points)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Writer producing raw point files; the header is finalized on [`RawPointWriter::finish`]
#[derive(Debug)]
pub struct RawPointWriter {
    file: BinaryFile,
    path: PathBuf,
    count: u64,
    bounds: Aabb,
    buffer: Vec<u8>,
}

impl RawPointWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BinaryFile::create(&path)?;
        file.write(&RawHeader { point_count: 0, bounds: Aabb::empty() }.encode())?;
        Ok(Self { file, path, count: 0, bounds: Aabb::empty(), buffer: Vec::new() })
    }

    pub fn write_point(&mut self, point: &Point) -> Result<()> {
        let start = self.buffer.len();
        self.buffer.resize(start + POINT_RECORD_SIZE, 0);
        point.encode(&mut self.buffer[start..]);
        self.bounds.extend(point.position());
        self.count += 1;

        if self.buffer.len() >= 1 << 20 {
            self.flush()?;
        }
        Ok(())
    }

    pub fn write_points(&mut self, points: &[Point]) -> Result<()> {
        for point in points {
            self.write_point(point)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.write(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Flush records and rewrite the header with the final count and bounds
    pub fn finish(mut self) -> Result<RawHeader> {
        self.flush()?;
        let header = RawHeader { point_count: self.count, bounds: self.bounds };
        self.file.seek(0)?;
        self.file.write(&header.encode())?;
        self.file.close();
        tracing::debug!(path = %self.path.display(), points = self.count, "raw point file written");
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plot.raw");

        let mut writer = RawPointWriter::create(&path).unwrap();
        for i in 0..10 {
            writer.write_point(&Point::new(i as f64, 2.0 * i as f64, 0.5)).unwrap();
        }
        let header = writer.finish().unwrap();
        assert_eq!(header.point_count, 10);
        assert_eq!(header.bounds.max, [9.0, 18.0, 0.5]);

        let mut reader = RawPointReader::open(&path).unwrap();
        assert_eq!(reader.header(), &header);
        let first = reader.read_batch(4).unwrap();
        let rest = reader.read_batch(100).unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(rest.len(), 6);
        assert_eq!(rest[0].x, 4.0);
        assert!(reader.read_batch(100).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plot.raw");
        BinaryFile::write_string(&path, &"x".repeat(RAW_HEADER_SIZE as usize)).unwrap();

        let err = RawHeader::read(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_truncated_body_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plot.raw");
        let mut writer = RawPointWriter::create(&path).unwrap();
        writer.write_point(&Point::new(0.0, 0.0, 0.0)).unwrap();
        writer.write_point(&Point::new(1.0, 1.0, 1.0)).unwrap();
        writer.finish().unwrap();

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(RAW_HEADER_SIZE + 40).unwrap();

        let err = RawHeader::read(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_point_outside_bounds_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plot.raw");
        let mut writer = RawPointWriter::create(&path).unwrap();
        writer.write_point(&Point::new(0.0, 0.0, 0.0)).unwrap();
        writer.write_point(&Point::new(1.0, 1.0, 1.0)).unwrap();
        writer.finish().unwrap();

        // Shrink the header bounds so the second point falls outside.
        let header = RawHeader { point_count: 2, bounds: Aabb::new([0.0; 3], [0.5; 3]) };
        BinaryFile::write_at(&path, &header.encode(), 0).unwrap();

        let mut reader = RawPointReader::open(&path).unwrap();
        let err = reader.read_batch(10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
