//! Resumable, cancellable spatial index builder.
//!
//! The caller drives the build: every [`SpatialIndexBuilder::next`] call does
//! one bounded quantum of work. The build runs in four stages over a keyed
//! scratch file (`code, order, point`):
//!
//! 1. distribute: read a batch of raw points and append keyed records
//! 2. sort: external sort of the scratch file by `(code, order)`
//! 3. summarize: accumulate per-cell bounds and counts
//! 4. write: header, cell table, then the point records in cell order
//!
//! All output goes to a temporary sibling of the output path which is moved
//! over the output only once everything has been written.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use canopy_core::config::BuildSettings;
use canopy_core::error::{CanopyError, Result};
use canopy_core::formats::{
    write_layout, IndexHeader, IndexLayout, RawPointReader, CELL_ENTRY_SIZE, FLAG_RANDOMIZED,
    INDEX_HEADER_SIZE,
};
use canopy_core::io::{BinaryFile, SortJob};
use canopy_core::models::{Aabb, CellRecord, Point, POINT_RECORD_SIZE};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::grid::Grid;

/// Scratch record: cell code, order key, point
pub const KEYED_RECORD_SIZE: usize = 16 + POINT_RECORD_SIZE;

const DISTRIBUTE_END: f64 = 0.4;
const SORT_END: f64 = 0.7;
const SUMMARIZE_END: f64 = 0.8;

type KeyCompare = fn(&[u8], &[u8]) -> Ordering;

/// Observable state of one import
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBuildJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Where the output is assembled before publication
    pub temporary_path: PathBuf,
    /// Completion in [0, 1], never decreasing
    pub percent: f64,
    pub done: bool,
    pub randomize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Running,
    Done,
    Failed,
    Cancelled,
}

enum Stage {
    Distribute(Distribute),
    Sort(SortJob<KeyCompare>),
    Summarize(Summarize),
    Write(WriteRecords),
    Finished,
}

struct Distribute {
    reader: RawPointReader,
    scratch: BinaryFile,
    rng: Option<ChaCha8Rng>,
    sequence: u64,
}

struct Summarize {
    scratch: BinaryFile,
    cells: Vec<CellRecord>,
    read: u64,
}

struct WriteRecords {
    scratch: BinaryFile,
    output: BinaryFile,
    copied: u64,
}

pub struct SpatialIndexBuilder {
    job: IndexBuildJob,
    settings: BuildSettings,
    grid: Grid,
    total: u64,
    scratch_path: PathBuf,
    stage: Stage,
    state: BuildState,
    layout: Option<IndexLayout>,
    failure: Option<CanopyError>,
}

impl SpatialIndexBuilder {
    /// Validate the input and prepare a build of `input_path` into `output_path`
    ///
    /// Fails before creating any file when the input is missing, unreadable
    /// or has a malformed header.
    pub fn start(
        output_path: impl AsRef<Path>,
        input_path: impl AsRef<Path>,
        settings: BuildSettings,
    ) -> Result<Self> {
        let output_path = output_path.as_ref().to_path_buf();
        let input_path = input_path.as_ref().to_path_buf();

        for (key, value) in
            [("max_cell_points", settings.max_cell_points), ("batch_points", settings.batch_points)]
        {
            if value == 0 {
                return Err(CanopyError::ConfigInvalid {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if output_path == input_path {
            return Err(CanopyError::ConfigInvalid {
                key: "output".to_string(),
                reason: "output path must differ from the input path".to_string(),
            });
        }

        let reader = RawPointReader::open(&input_path)?;
        let header = *reader.header();
        let grid = Grid::plan(header.bounds, header.point_count, settings.max_cell_points);

        let temporary_path = BinaryFile::tmpname(&output_path, &input_path);
        let scratch_path = BinaryFile::append_extension(&temporary_path, "keys");
        let scratch = BinaryFile::create(&scratch_path)?;

        let rng = settings.randomize.then(|| {
            let seed = settings.seed.unwrap_or_else(rand::random);
            tracing::debug!(seed, "shuffling points within cells");
            ChaCha8Rng::seed_from_u64(seed)
        });

        tracing::info!(
            input = %input_path.display(),
            output = %output_path.display(),
            points = header.point_count,
            grid = ?grid.divisions(),
            randomize = settings.randomize,
            "index build started"
        );

        Ok(Self {
            job: IndexBuildJob {
                input_path,
                output_path,
                temporary_path,
                percent: 0.0,
                done: false,
                randomize: settings.randomize,
            },
            settings,
            grid,
            total: header.point_count,
            scratch_path,
            stage: Stage::Distribute(Distribute { reader, scratch, rng, sequence: 0 }),
            state: BuildState::Running,
            layout: None,
            failure: None,
        })
    }

    /// True once the output has been published
    pub fn end(&self) -> bool {
        self.state == BuildState::Done
    }

    pub fn percent(&self) -> f64 {
        self.job.percent
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn job(&self) -> &IndexBuildJob {
        &self.job
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Header and cell table of the output, known from the write stage on
    pub fn layout(&self) -> Option<&IndexLayout> {
        self.layout.as_ref()
    }

    /// Perform one bounded quantum of work
    ///
    /// After a failure every further call returns the same error. After
    /// completion or cancellation this is a no-op.
    pub fn next(&mut self) -> Result<()> {
        match self.state {
            BuildState::Running => {}
            BuildState::Failed => {
                return match &self.failure {
                    Some(err) => Err(err.duplicate()),
                    None => Ok(()),
                };
            }
            BuildState::Done | BuildState::Cancelled => return Ok(()),
        }

        if let Err(err) = self.step() {
            tracing::warn!(
                input = %self.job.input_path.display(),
                error = %err,
                "index build failed"
            );
            self.discard();
            self.state = BuildState::Failed;
            self.failure = Some(err.duplicate());
            return Err(err);
        }

        self.job.percent = self.job.percent.max(self.progress());
        Ok(())
    }

    /// Abandon the build and delete every temporary file
    ///
    /// The output path is left exactly as it was before `start`.
    pub fn cancel(&mut self) {
        if self.state != BuildState::Running {
            return;
        }
        self.discard();
        self.state = BuildState::Cancelled;
        tracing::info!(output = %self.job.output_path.display(), "index build cancelled");
    }

    fn step(&mut self) -> Result<()> {
        let stage = std::mem::replace(&mut self.stage, Stage::Finished);
        self.stage = match stage {
            Stage::Distribute(d) => self.distribute(d)?,
            Stage::Sort(s) => self.sort(s)?,
            Stage::Summarize(s) => self.summarize(s)?,
            Stage::Write(w) => self.write(w)?,
            Stage::Finished => Stage::Finished,
        };
        Ok(())
    }

    fn distribute(&mut self, mut d: Distribute) -> Result<Stage> {
        let points = d.reader.read_batch(self.settings.batch_points)?;

        let mut buffer = vec![0u8; points.len() * KEYED_RECORD_SIZE];
        for (point, record) in points.iter().zip(buffer.chunks_exact_mut(KEYED_RECORD_SIZE)) {
            let order = match d.rng.as_mut() {
                Some(rng) => rng.gen::<u64>(),
                None => d.sequence,
            };
            d.sequence += 1;
            record[0..8].copy_from_slice(&self.grid.code(point.position()).to_le_bytes());
            record[8..16].copy_from_slice(&order.to_le_bytes());
            point.encode(&mut record[16..]);
        }
        d.scratch.write(&buffer)?;

        if d.reader.remaining() > 0 {
            return Ok(Stage::Distribute(d));
        }

        d.scratch.sync()?;
        drop(d);
        let sort = SortJob::new(
            &self.scratch_path,
            KEYED_RECORD_SIZE,
            self.settings.sort_run_bytes,
            compare_keys as KeyCompare,
        )?;
        Ok(Stage::Sort(sort))
    }

    fn sort(&mut self, mut sort: SortJob<KeyCompare>) -> Result<Stage> {
        if !sort.end() {
            sort.next()?;
        }
        if !sort.end() {
            return Ok(Stage::Sort(sort));
        }

        drop(sort);
        let scratch = BinaryFile::open(&self.scratch_path)?;
        Ok(Stage::Summarize(Summarize { scratch, cells: Vec::new(), read: 0 }))
    }

    fn summarize(&mut self, mut s: Summarize) -> Result<Stage> {
        let count = (self.total - s.read).min(self.settings.batch_points);
        let data = s.scratch.read_vec(count * KEYED_RECORD_SIZE as u64)?;

        for record in data.chunks_exact(KEYED_RECORD_SIZE) {
            let code = read_u64(record, 0);
            let position = Point::decode(&record[16..]).position();
            match s.cells.last_mut() {
                Some(cell) if cell.code == code => {
                    cell.bounds.extend(position);
                    cell.point_count += 1;
                }
                _ => {
                    let mut bounds = Aabb::empty();
                    bounds.extend(position);
                    s.cells.push(CellRecord { code, bounds, offset: 0, length: 0, point_count: 1 });
                }
            }
        }
        s.read += count;

        if s.read < self.total {
            return Ok(Stage::Summarize(s));
        }

        let layout = self.finish_layout(s.cells);
        let mut output = BinaryFile::create(&self.job.temporary_path)?;
        write_layout(&mut output, &layout)?;
        s.scratch.seek(0)?;
        self.layout = Some(layout);

        Ok(Stage::Write(WriteRecords { scratch: s.scratch, output, copied: 0 }))
    }

    fn finish_layout(&self, mut cells: Vec<CellRecord>) -> IndexLayout {
        let cell_count = cells.len() as u64;
        let mut offset = INDEX_HEADER_SIZE + cell_count * CELL_ENTRY_SIZE;
        let mut bounds = Aabb::empty();

        for cell in &mut cells {
            cell.offset = offset;
            cell.length = cell.point_count * POINT_RECORD_SIZE as u64;
            offset += cell.length;
            bounds.merge(&cell.bounds);
        }

        IndexLayout {
            header: IndexHeader {
                point_count: self.total,
                cell_count,
                bounds,
                grid: self.grid.divisions(),
                flags: if self.settings.randomize { FLAG_RANDOMIZED } else { 0 },
            },
            cells,
        }
    }

    fn write(&mut self, mut w: WriteRecords) -> Result<Stage> {
        let count = (self.total - w.copied).min(self.settings.batch_points);
        let data = w.scratch.read_vec(count * KEYED_RECORD_SIZE as u64)?;

        let mut buffer = Vec::with_capacity(count as usize * POINT_RECORD_SIZE);
        for record in data.chunks_exact(KEYED_RECORD_SIZE) {
            buffer.extend_from_slice(&record[16..]);
        }
        w.output.write(&buffer)?;
        w.copied += count;

        if w.copied < self.total {
            return Ok(Stage::Write(w));
        }

        w.output.sync()?;
        drop(w);
        self.publish()?;
        Ok(Stage::Finished)
    }

    fn publish(&mut self) -> Result<()> {
        BinaryFile::move_file(&self.job.output_path, &self.job.temporary_path)?;
        if let Err(err) = BinaryFile::remove(&self.scratch_path) {
            tracing::warn!(path = %self.scratch_path.display(), error = %err, "failed to remove scratch file");
        }

        self.state = BuildState::Done;
        self.job.done = true;
        self.job.percent = 1.0;

        tracing::info!(
            output = %self.job.output_path.display(),
            points = self.total,
            cells = self.layout.as_ref().map_or(0, |l| l.header.cell_count),
            "index published"
        );
        Ok(())
    }

    fn progress(&self) -> f64 {
        if self.state == BuildState::Done {
            return 1.0;
        }
        let fraction = |done: u64| {
            if self.total == 0 {
                1.0
            } else {
                done as f64 / self.total as f64
            }
        };
        match &self.stage {
            Stage::Distribute(d) => DISTRIBUTE_END * fraction(d.reader.position()),
            Stage::Sort(sort) => DISTRIBUTE_END + (SORT_END - DISTRIBUTE_END) * sort.percent(),
            Stage::Summarize(s) => SORT_END + (SUMMARIZE_END - SORT_END) * fraction(s.read),
            Stage::Write(w) => SUMMARIZE_END + (1.0 - SUMMARIZE_END) * fraction(w.copied),
            Stage::Finished => self.job.percent,
        }
    }

    /// Close every open file and delete the scratch and temporary output
    fn discard(&mut self) {
        self.stage = Stage::Finished;
        for path in [&self.scratch_path, &self.job.temporary_path] {
            if let Err(err) = BinaryFile::remove(path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove temporary file");
            }
        }
    }
}

impl Drop for SpatialIndexBuilder {
    fn drop(&mut self) {
        if self.state == BuildState::Running {
            self.discard();
        }
    }
}

fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    read_u64(a, 0).cmp(&read_u64(b, 0)).then_with(|| read_u64(a, 8).cmp(&read_u64(b, 8)))
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}
