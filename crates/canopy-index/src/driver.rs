//! Drivers that run a [`SpatialIndexBuilder`] to completion.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use canopy_core::config::BuildSettings;
use canopy_core::error::{CanopyError, Result};
use canopy_core::formats::IndexLayout;
use crossbeam_channel::{bounded, Receiver};

use crate::builder::SpatialIndexBuilder;

const PROGRESS_CAPACITY: usize = 64;

/// How a driven build ended
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Completed(IndexLayout),
    Cancelled,
}

/// Build an index on the calling thread, polling `cancel` between quanta
pub fn build_index<F>(
    output: impl AsRef<Path>,
    input: impl AsRef<Path>,
    settings: BuildSettings,
    cancel: &AtomicBool,
    mut progress: F,
) -> Result<BuildOutcome>
where
    F: FnMut(f64),
{
    let output = output.as_ref();
    let mut builder = SpatialIndexBuilder::start(output, input, settings)?;
    progress(builder.percent());

    while !builder.end() {
        if cancel.load(Ordering::Acquire) {
            builder.cancel();
            return Ok(BuildOutcome::Cancelled);
        }
        builder.next()?;
        progress(builder.percent());
    }

    let layout = builder
        .layout()
        .cloned()
        .ok_or_else(|| CanopyError::IndexMissing { path: output.to_path_buf() })?;
    Ok(BuildOutcome::Completed(layout))
}

/// A build running on its own thread
///
/// Progress values arrive on [`BuildHandle::progress`]; updates are dropped
/// while the channel is full. Dropping the handle cancels and joins.
pub struct BuildHandle {
    progress: Receiver<f64>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<BuildOutcome>>>,
}

impl BuildHandle {
    pub fn progress(&self) -> &Receiver<f64> {
        &self.progress
    }

    /// Request cancellation; the build stops before its next quantum
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the build thread and return its outcome
    pub fn join(mut self) -> Result<BuildOutcome> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| {
                CanopyError::Io(io::Error::new(io::ErrorKind::Other, "index build thread panicked"))
            })?,
            None => Ok(BuildOutcome::Cancelled),
        }
    }
}

impl Drop for BuildHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.cancel();
            let _ = thread.join();
        }
    }
}

/// Run [`build_index`] on a dedicated thread
pub fn spawn_build(
    output: impl Into<PathBuf>,
    input: impl Into<PathBuf>,
    settings: BuildSettings,
) -> Result<BuildHandle> {
    let output = output.into();
    let input = input.into();
    let (tx, rx) = bounded::<f64>(PROGRESS_CAPACITY);
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    let thread = thread::Builder::new()
        .name("canopy-import".to_string())
        .spawn(move || {
            build_index(&output, &input, settings, &flag, |percent| {
                let _ = tx.try_send(percent);
            })
        })
        .map_err(CanopyError::Io)?;

    Ok(BuildHandle { progress: rx, cancel, thread: Some(thread) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::formats::RawPointWriter;
    use canopy_core::io::BinaryFile;
    use canopy_core::models::Point;
    use tempfile::TempDir;

    fn write_line(path: &Path, n: usize) {
        let mut writer = RawPointWriter::create(path).unwrap();
        for i in 0..n {
            writer.write_point(&Point::new(i as f64, (i % 7) as f64, 0.0)).unwrap();
        }
        writer.finish().unwrap();
    }

    fn settings() -> BuildSettings {
        BuildSettings { seed: Some(1), max_cell_points: 10, batch_points: 16, ..Default::default() }
    }

    #[test]
    fn test_build_index_completes() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("line.raw");
        let output = dir.path().join("line.raw.idx");
        write_line(&input, 200);

        let mut seen = Vec::new();
        let outcome =
            build_index(&output, &input, settings(), &AtomicBool::new(false), |p| seen.push(p))
                .unwrap();

        let BuildOutcome::Completed(layout) = outcome else {
            panic!("expected a completed build");
        };
        assert_eq!(layout.header.point_count, 200);
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(BinaryFile::exists(&output));
    }

    #[test]
    fn test_build_index_cancelled_from_progress() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("line.raw");
        let output = dir.path().join("line.raw.idx");
        write_line(&input, 200);

        let cancel = AtomicBool::new(false);
        let outcome = build_index(&output, &input, settings(), &cancel, |p| {
            if p > 0.2 {
                cancel.store(true, Ordering::Release);
            }
        })
        .unwrap();

        assert_eq!(outcome, BuildOutcome::Cancelled);
        assert!(!BinaryFile::exists(&output));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_spawn_build() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("line.raw");
        let output = dir.path().join("line.raw.idx");
        write_line(&input, 500);

        let handle = spawn_build(&output, &input, settings()).unwrap();
        let mut last = 0.0;
        for percent in handle.progress().iter() {
            assert!(percent >= last);
            last = percent;
        }

        let outcome = handle.join().unwrap();
        assert!(matches!(outcome, BuildOutcome::Completed(ref l) if l.header.point_count == 500));
    }

    #[test]
    fn test_spawn_build_reports_errors() {
        let dir = TempDir::new().unwrap();
        let handle =
            spawn_build(dir.path().join("out.idx"), dir.path().join("missing.raw"), settings())
                .unwrap();
        let err = handle.join().unwrap_err();
        assert_eq!(err.kind(), canopy_core::ErrorKind::NotFound);
    }
}
