pub mod bounds;
pub mod cell;
pub mod dataset;
pub mod point;
pub mod settings;

pub use bounds::Aabb;
pub use cell::{Cell, CellHandle, CellRecord, CellState};
pub use dataset::{DataSet, DataSetId};
pub use point::{Point, POINT_RECORD_SIZE};
pub use settings::{
    ClassificationSettings, ClipFilter, ColorSource, EditorSettings, ViewSettings, CLASS_COUNT,
};
