//! Canopy Index - Spatial index builder
//!
//! Turns a raw point file into an indexed file whose points are grouped by
//! grid cell, one bounded step at a time.

pub mod builder;
pub mod driver;
pub mod grid;

pub use builder::{BuildState, IndexBuildJob, SpatialIndexBuilder, KEYED_RECORD_SIZE};
pub use canopy_core::config::BuildSettings;
pub use driver::{build_index, spawn_build, BuildHandle, BuildOutcome};
pub use grid::{morton_decode, morton_encode, Grid};
