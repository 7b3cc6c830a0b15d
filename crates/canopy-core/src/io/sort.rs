//! Resumable external merge sort over files of fixed-size records.
//!
//! The file is split into runs that fit in `run_bytes`; each run is sorted in
//! memory and written to a sibling scratch file, then all runs are merged
//! into a scratch output which finally replaces the input. Every call to
//! [`SortJob::next`] does a bounded amount of work.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::error::{CanopyError, Result};
use crate::io::file::BinaryFile;

/// Default memory budget of a single run
pub const DEFAULT_RUN_BYTES: usize = 64 << 20;

/// Records buffered per run reader during the merge
const MERGE_READ_RECORDS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortPhase {
    Runs,
    Merge,
    Done,
}

pub struct SortJob<F> {
    path: PathBuf,
    element_size: usize,
    run_elements: u64,
    total: u64,
    compare: F,
    phase: SortPhase,
    input: Option<BinaryFile>,
    sorted: u64,
    runs: Vec<PathBuf>,
    readers: Vec<RunReader>,
    output: Option<BinaryFile>,
    output_path: PathBuf,
    merged: u64,
}

impl<F> SortJob<F>
where
    F: FnMut(&[u8], &[u8]) -> Ordering,
{
    pub fn new(
        path: impl AsRef<Path>,
        element_size: usize,
        run_bytes: usize,
        compare: F,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if element_size == 0 {
            return Err(CanopyError::ConfigInvalid {
                key: "element_size".to_string(),
                reason: "record size must be positive".to_string(),
            });
        }

        let input = BinaryFile::open(&path)?;
        if input.size() % element_size as u64 != 0 {
            return Err(CanopyError::corrupt(
                &path,
                format!("size {} is not a multiple of record size {}", input.size(), element_size),
            ));
        }

        let total = input.size() / element_size as u64;
        let run_elements = (run_bytes / element_size).max(1) as u64;
        let output_path = BinaryFile::append_extension(&path, "sorted.tmp");
        let phase = if total == 0 { SortPhase::Done } else { SortPhase::Runs };

        Ok(Self {
            path,
            element_size,
            run_elements,
            total,
            compare,
            phase,
            input: Some(input),
            sorted: 0,
            runs: Vec::new(),
            readers: Vec::new(),
            output: None,
            output_path,
            merged: 0,
        })
    }

    pub fn end(&self) -> bool {
        self.phase == SortPhase::Done
    }

    /// Fraction of work done in [0, 1]
    pub fn percent(&self) -> f64 {
        if self.total == 0 || self.phase == SortPhase::Done {
            return 1.0;
        }
        let total = self.total as f64;
        0.5 * (self.sorted as f64 / total) + 0.5 * (self.merged as f64 / total)
    }

    /// Perform one bounded step: sort one run, or merge up to one run's worth of records
    pub fn next(&mut self) -> Result<()> {
        match self.phase {
            SortPhase::Runs => self.next_run(),
            SortPhase::Merge => self.next_merge(),
            SortPhase::Done => Ok(()),
        }
    }

    fn next_run(&mut self) -> Result<()> {
        let remaining = self.total - self.sorted;
        let count = remaining.min(self.run_elements);
        let input = self.input.as_mut().ok_or_else(|| closed(&self.path))?;
        let data = input.read_vec(count * self.element_size as u64)?;

        let compare = &mut self.compare;
        let mut records: Vec<&[u8]> = data.chunks_exact(self.element_size).collect();
        records.sort_by(|a, b| compare(a, b));

        let run_path = BinaryFile::append_extension(&self.path, &format!("run{}.tmp", self.runs.len()));
        self.runs.push(run_path.clone());
        let mut run = BinaryFile::create(&run_path)?;
        let mut buffer = Vec::with_capacity(data.len());
        for record in records {
            buffer.extend_from_slice(record);
        }
        run.write(&buffer)?;
        run.close();

        self.sorted += count;
        if self.sorted < self.total {
            return Ok(());
        }

        if let Some(mut input) = self.input.take() {
            input.close();
        }

        if self.runs.len() == 1 {
            let run = self.runs.remove(0);
            BinaryFile::move_file(&self.path, &run)?;
            self.merged = self.total;
            self.phase = SortPhase::Done;
            return Ok(());
        }

        for run in &self.runs {
            self.readers.push(RunReader::open(run, self.element_size)?);
        }
        self.output = Some(BinaryFile::create(&self.output_path)?);
        self.phase = SortPhase::Merge;
        Ok(())
    }

    fn next_merge(&mut self) -> Result<()> {
        let mut buffer = Vec::with_capacity(self.run_elements as usize * self.element_size);
        let mut emitted = 0u64;

        while emitted < self.run_elements {
            let mut best: Option<usize> = None;
            for i in 0..self.readers.len() {
                if self.readers[i].head().is_none() {
                    continue;
                }
                best = match best {
                    None => Some(i),
                    Some(b) => {
                        let (Some(candidate), Some(current)) =
                            (self.readers[i].head(), self.readers[b].head())
                        else {
                            continue;
                        };
                        // Ties go to the earlier run, keeping the sort stable.
                        if (self.compare)(candidate, current) == Ordering::Less {
                            Some(i)
                        } else {
                            Some(b)
                        }
                    }
                };
            }

            let Some(index) = best else {
                break;
            };
            if let Some(record) = self.readers[index].head() {
                buffer.extend_from_slice(record);
            }
            self.readers[index].advance()?;
            emitted += 1;
        }

        let output = self.output.as_mut().ok_or_else(|| closed(&self.output_path))?;
        output.write(&buffer)?;
        self.merged += emitted;

        if self.merged >= self.total {
            if let Some(mut output) = self.output.take() {
                output.close();
            }
            self.readers.clear();
            BinaryFile::move_file(&self.path, &self.output_path)?;
            for run in self.runs.drain(..) {
                BinaryFile::remove(&run)?;
            }
            self.phase = SortPhase::Done;
        }
        Ok(())
    }
}

impl<F> Drop for SortJob<F> {
    fn drop(&mut self) {
        if self.phase == SortPhase::Done {
            return;
        }
        self.readers.clear();
        self.output = None;
        for run in &self.runs {
            let _ = BinaryFile::remove(run);
        }
        let _ = BinaryFile::remove(&self.output_path);
    }
}

/// Buffered sequential reader over one sorted run
struct RunReader {
    file: BinaryFile,
    element_size: usize,
    buffer: Vec<u8>,
    position: usize,
}

impl RunReader {
    fn open(path: &Path, element_size: usize) -> Result<Self> {
        let mut reader =
            Self { file: BinaryFile::open(path)?, element_size, buffer: Vec::new(), position: 0 };
        reader.fill()?;
        Ok(reader)
    }

    fn head(&self) -> Option<&[u8]> {
        if self.position < self.buffer.len() {
            Some(&self.buffer[self.position..self.position + self.element_size])
        } else {
            None
        }
    }

    fn advance(&mut self) -> Result<()> {
        self.position += self.element_size;
        if self.position >= self.buffer.len() {
            self.fill()?;
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        let remaining = self.file.size() - self.file.offset();
        let n = remaining.min((MERGE_READ_RECORDS * self.element_size) as u64);
        self.buffer = self.file.read_vec(n)?;
        self.position = 0;
        Ok(())
    }
}

fn closed(path: &Path) -> CanopyError {
    CanopyError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("sort file is closed: {}", path.display()),
    ))
}
