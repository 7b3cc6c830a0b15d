//! Error types for Canopy

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanopyError {
    // File access errors
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Corrupt data in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Offset {offset} is out of range for size {size}")]
    OutOfRange { offset: u64, size: u64 },

    // Index errors
    #[error("Spatial index missing at {path}. Run 'canopy import' first")]
    IndexMissing { path: PathBuf },

    // Cache errors
    #[error("Cell cache exhausted: {resident} of {maximum} cells pinned or loading")]
    CacheExhausted { resident: usize, maximum: usize },

    // Dataset errors
    #[error("Dataset {id} is already open")]
    DataSetExists { id: u64 },

    #[error("Dataset not found: {id}")]
    DataSetNotFound { id: u64 },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of [`CanopyError`] used by callers to pick a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Corrupt,
    IoError,
    OutOfRange,
    IndexMissing,
    CacheExhausted,
    Other,
}

impl CanopyError {
    /// Classify an I/O error raised while accessing `path`
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => CanopyError::NotFound { path: path.to_path_buf() },
            io::ErrorKind::PermissionDenied => {
                CanopyError::PermissionDenied { path: path.to_path_buf() }
            }
            io::ErrorKind::UnexpectedEof => {
                CanopyError::Corrupt { path: path.to_path_buf(), reason: err.to_string() }
            }
            _ => CanopyError::Io(err),
        }
    }

    /// Shorthand for a [`CanopyError::Corrupt`] error
    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        CanopyError::Corrupt { path: path.to_path_buf(), reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CanopyError::NotFound { .. } => ErrorKind::NotFound,
            CanopyError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            CanopyError::Corrupt { .. } => ErrorKind::Corrupt,
            CanopyError::OutOfRange { .. } => ErrorKind::OutOfRange,
            CanopyError::IndexMissing { .. } => ErrorKind::IndexMissing,
            CanopyError::CacheExhausted { .. } => ErrorKind::CacheExhausted,
            CanopyError::Io(_) => ErrorKind::IoError,
            _ => ErrorKind::Other,
        }
    }

    /// Rebuild an equivalent error so a failed job can report it more than once
    pub fn duplicate(&self) -> Self {
        match self {
            CanopyError::NotFound { path } => CanopyError::NotFound { path: path.clone() },
            CanopyError::PermissionDenied { path } => {
                CanopyError::PermissionDenied { path: path.clone() }
            }
            CanopyError::Corrupt { path, reason } => {
                CanopyError::Corrupt { path: path.clone(), reason: reason.clone() }
            }
            CanopyError::OutOfRange { offset, size } => {
                CanopyError::OutOfRange { offset: *offset, size: *size }
            }
            CanopyError::IndexMissing { path } => CanopyError::IndexMissing { path: path.clone() },
            CanopyError::CacheExhausted { resident, maximum } => {
                CanopyError::CacheExhausted { resident: *resident, maximum: *maximum }
            }
            CanopyError::DataSetExists { id } => CanopyError::DataSetExists { id: *id },
            CanopyError::DataSetNotFound { id } => CanopyError::DataSetNotFound { id: *id },
            CanopyError::ConfigInvalid { key, reason } => {
                CanopyError::ConfigInvalid { key: key.clone(), reason: reason.clone() }
            }
            CanopyError::Io(err) => CanopyError::Io(io::Error::new(err.kind(), err.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, CanopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classification() {
        let path = Path::new("/data/plot.raw");

        let err = CanopyError::from_io(io::Error::from(io::ErrorKind::NotFound), path);
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = CanopyError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), path);
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = CanopyError::from_io(io::Error::from(io::ErrorKind::UnexpectedEof), path);
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err = CanopyError::from_io(io::Error::from(io::ErrorKind::WriteZero), path);
        assert_eq!(err.kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_duplicate_keeps_kind_and_message() {
        let err = CanopyError::corrupt(Path::new("a.raw"), "bad magic");
        let copy = err.duplicate();
        assert_eq!(copy.kind(), ErrorKind::Corrupt);
        assert_eq!(copy.to_string(), err.to_string());

        let err = CanopyError::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(err.duplicate().kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_session_and_config_errors_are_other() {
        let errors = [
            CanopyError::DataSetExists { id: 1 },
            CanopyError::DataSetNotFound { id: 2 },
            CanopyError::ConfigInvalid { key: "worker_threads".into(), reason: "zero".into() },
        ];
        for err in &errors {
            assert_eq!(err.kind(), ErrorKind::Other);
            assert_eq!(err.duplicate().to_string(), err.to_string());
        }
    }
}
