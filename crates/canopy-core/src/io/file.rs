//! Random-access binary file with an explicit cursor.
//!
//! `BinaryFile` tracks its own size and offset so that out-of-range seeks and
//! short reads are reported as errors instead of being silently clamped.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{CanopyError, Result};
use crate::io::sort::{SortJob, DEFAULT_RUN_BYTES};

/// Chunk size used when streaming bytes from one file into another
pub const COPY_CHUNK_SIZE: usize = 1 << 20;

/// Access mode for [`BinaryFile::open_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only, file must exist
    Read,
    /// Read and write, file must exist
    ReadWrite,
    /// Write only, created if missing, existing content kept
    Write,
    /// Truncate or create
    Create,
}

#[derive(Debug, Default)]
pub struct BinaryFile {
    file: Option<File>,
    size: u64,
    offset: u64,
    path: PathBuf,
}

impl BinaryFile {
    /// Create or truncate `path` for reading and writing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenMode::Create)
    }

    /// Open an existing file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenMode::Read)
    }

    pub fn open_with(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Write => options.write(true).create(true),
            OpenMode::Create => options.read(true).write(true).create(true).truncate(true),
        };

        let file = options.open(path).map_err(|e| CanopyError::from_io(e, path))?;
        let size = file.metadata().map_err(|e| CanopyError::from_io(e, path))?.len();

        Ok(Self { file: Some(file), size, offset: 0, path: path.to_path_buf() })
    }

    /// Close the file. Safe to call any number of times.
    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Move the cursor to an absolute offset in `0..=size`
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.size {
            return Err(CanopyError::OutOfRange { offset, size: self.size });
        }
        let path = self.path.clone();
        self.handle()?.seek(SeekFrom::Start(offset)).map_err(|e| CanopyError::from_io(e, &path))?;
        self.offset = offset;
        Ok(())
    }

    /// Advance the cursor by `nbyte`
    pub fn skip(&mut self, nbyte: u64) -> Result<()> {
        let target = self
            .offset
            .checked_add(nbyte)
            .ok_or(CanopyError::OutOfRange { offset: u64::MAX, size: self.size })?;
        self.seek(target)
    }

    /// Fill `buffer` completely from the current offset
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        let nbyte = buffer.len() as u64;
        if nbyte > self.size - self.offset.min(self.size) {
            return Err(CanopyError::corrupt(
                &self.path,
                format!(
                    "short read: {} bytes requested at offset {}, file size {}",
                    nbyte, self.offset, self.size
                ),
            ));
        }
        let path = self.path.clone();
        self.handle()?.read_exact(buffer).map_err(|e| CanopyError::from_io(e, &path))?;
        self.offset += nbyte;
        Ok(())
    }

    /// Read `nbyte` bytes into a new buffer
    pub fn read_vec(&mut self, nbyte: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(nbyte)
            .map_err(|_| CanopyError::OutOfRange { offset: nbyte, size: self.size })?;
        let mut buffer = vec![0u8; len];
        self.read(&mut buffer)?;
        Ok(buffer)
    }

    /// Write raw bytes at the current offset
    pub fn write(&mut self, buffer: &[u8]) -> Result<()> {
        let path = self.path.clone();
        self.handle()?.write_all(buffer).map_err(|e| CanopyError::from_io(e, &path))?;
        self.offset += buffer.len() as u64;
        self.size = self.size.max(self.offset);
        Ok(())
    }

    /// Copy `nbyte` bytes from the cursor of `input`, streamed in fixed-size chunks
    pub fn write_from(&mut self, input: &mut BinaryFile, nbyte: u64) -> Result<()> {
        let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
        let mut remaining = nbyte;
        while remaining > 0 {
            let n = remaining.min(COPY_CHUNK_SIZE as u64) as usize;
            input.read(&mut buffer[..n])?;
            self.write(&buffer[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Flush written data to the operating system and to disk
    pub fn sync(&mut self) -> Result<()> {
        let path = self.path.clone();
        let file = self.handle()?;
        file.flush().map_err(|e| CanopyError::from_io(e, &path))?;
        file.sync_all().map_err(|e| CanopyError::from_io(e, &path))
    }

    pub fn eof(&self) -> bool {
        self.offset >= self.size
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&mut self) -> Result<&mut File> {
        let path = &self.path;
        self.file.as_mut().ok_or_else(|| {
            CanopyError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("file is closed: {}", path.display()),
            ))
        })
    }

    // Path utilities. These never touch the file system.

    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().exists()
    }

    pub fn is_absolute(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_absolute()
    }

    /// Last path component, empty when there is none
    pub fn file_name(path: impl AsRef<Path>) -> String {
        path.as_ref().file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }

    /// Extension without the leading dot, empty when there is none
    pub fn file_extension(path: impl AsRef<Path>) -> String {
        path.as_ref().extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default()
    }

    pub fn replace_file_name(path: impl AsRef<Path>, new_file_name: &str) -> PathBuf {
        path.as_ref().with_file_name(new_file_name)
    }

    /// Replace the extension; `new_extension` may carry a leading dot
    pub fn replace_extension(path: impl AsRef<Path>, new_extension: &str) -> PathBuf {
        path.as_ref().with_extension(new_extension.trim_start_matches('.'))
    }

    /// Append `.suffix` to the full file name (`plot.raw` -> `plot.raw.idx`)
    pub fn append_extension(path: impl AsRef<Path>, suffix: &str) -> PathBuf {
        let mut name: OsString = path.as_ref().as_os_str().to_owned();
        name.push(".");
        name.push(suffix.trim_start_matches('.'));
        PathBuf::from(name)
    }

    /// Temporary sibling of `output_path` reserved for building it from `input_path`
    ///
    /// Both components are length-prefixed (`.9-plot.raw.4-plot.tmp`), so
    /// names containing dots cannot make two pairs meet.
    pub fn tmpname(output_path: impl AsRef<Path>, input_path: impl AsRef<Path>) -> PathBuf {
        let output = output_path.as_ref();
        let output_name = Self::file_name(output);
        let stem = input_path
            .as_ref()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!(".{}-{}.{}-{}.tmp", output_name.len(), output_name, stem.len(), stem);
        Self::replace_file_name(output, &name)
    }

    // Whole-path helpers

    /// Read exactly `buffer.len()` bytes at `offset` of `path`
    pub fn read_at(path: impl AsRef<Path>, buffer: &mut [u8], offset: u64) -> Result<()> {
        let mut file = Self::open(path)?;
        file.seek(offset)?;
        file.read(buffer)
    }

    /// Write `buffer` at `offset` of `path`
    ///
    /// `offset` must not lie past the current end of the file. A missing
    /// file is created empty, so only offset 0 is valid for it; larger
    /// offsets fail with `OutOfRange` and leave the empty file behind.
    pub fn write_at(path: impl AsRef<Path>, buffer: &[u8], offset: u64) -> Result<()> {
        let mut file = Self::open_with(path, OpenMode::Write)?;
        file.seek(offset)?;
        file.write(buffer)
    }

    pub fn read_string(path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let mut file = Self::open(path)?;
        let bytes = file.read_vec(file.size())?;
        String::from_utf8(bytes).map_err(|e| CanopyError::corrupt(path, e.to_string()))
    }

    pub fn write_string(path: impl AsRef<Path>, data: &str) -> Result<()> {
        let mut file = Self::create(path)?;
        file.write(data.as_bytes())
    }

    /// Sort a file of fixed-size records in place without loading it whole
    pub fn sort<F>(path: impl AsRef<Path>, element_size: usize, compare: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        let mut job = SortJob::new(path, element_size, DEFAULT_RUN_BYTES, compare)?;
        while !job.end() {
            job.next()?;
        }
        Ok(())
    }

    /// Atomically publish `input_path` under the name `output_path`
    pub fn move_file(output_path: impl AsRef<Path>, input_path: impl AsRef<Path>) -> Result<()> {
        let input = input_path.as_ref();
        fs::rename(input, output_path.as_ref()).map_err(|e| CanopyError::from_io(e, input))
    }

    /// Remove a file if it exists
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CanopyError::from_io(e, path)),
        }
    }
}
