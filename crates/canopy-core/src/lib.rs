//! Canopy Core - Domain models, file primitives, formats, and configuration
//!
//! This crate contains the building blocks shared by the index builder, the
//! cell cache, and the editor session: the point and cell models, the
//! random-access `BinaryFile` with its external sort, and the raw and
//! indexed on-disk formats.

pub mod config;
pub mod error;
pub mod formats;
pub mod io;
pub mod models;

pub use error::{CanopyError, ErrorKind, Result};
