use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::bounds::Aabb;

/// Unique identifier for a dataset, stable within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataSetId(pub u64);

impl fmt::Display for DataSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One opened, indexed input file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    /// Unique identifier
    pub id: DataSetId,

    /// Path the dataset was imported from
    pub path: PathBuf,

    /// Path to the spatial index backing this dataset
    pub index_path: PathBuf,

    /// Display name (file name of the import path)
    pub name: String,

    /// When the dataset was opened
    pub date_created: DateTime<Utc>,

    /// Overall bounds of every point
    pub bounds: Aabb,

    /// Total number of points
    pub point_count: u64,

    /// Whether the viewer should show this dataset
    pub visible: bool,
}
