//! Binary file access
//!
//! `BinaryFile` is the only way the rest of the workspace touches point data
//! on disk; `SortJob` provides the out-of-core reordering used by the index
//! builder.

pub mod file;
pub mod sort;

pub use file::{BinaryFile, OpenMode, COPY_CHUNK_SIZE};
pub use sort::{SortJob, DEFAULT_RUN_BYTES};
