//! Little-endian field codecs for fixed headers.

use std::path::Path;

use crate::error::{CanopyError, Result};

/// Cursor over a header buffer
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], path: &'a Path) -> Self {
        Self { data, position: 0, path }
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.position + n;
        if end > self.data.len() {
            return Err(CanopyError::corrupt(self.path, "truncated header"));
        }
        let out = &self.data[self.position..end];
        self.position = end;
        Ok(out)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(b);
        Ok(u64::from_le_bytes(out))
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    pub(crate) fn xyz(&mut self) -> Result<[f64; 3]> {
        Ok([self.f64()?, self.f64()?, self.f64()?])
    }
}

/// Append-only header builder
#[derive(Default)]
pub(crate) struct ByteWriter {
    data: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.data.extend_from_slice(b);
        self
    }

    pub(crate) fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub(crate) fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub(crate) fn f64(&mut self, v: f64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub(crate) fn xyz(&mut self, v: [f64; 3]) -> &mut Self {
        self.f64(v[0]).f64(v[1]).f64(v[2])
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.data
    }
}
