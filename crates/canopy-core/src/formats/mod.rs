//! On-disk formats
//!
//! Two layouts are understood: the raw point file consumed by the index
//! builder and the indexed file whose cells are independently addressable.
//! Both are little-endian and share the 36-byte point record.

mod bytes;
pub mod index;
pub mod raw;

pub use index::{
    has_index, index_path_for, read_layout, write_layout, IndexHeader, IndexLayout,
    CELL_ENTRY_SIZE, FLAG_RANDOMIZED, INDEX_HEADER_SIZE,
};
pub use raw::{RawHeader, RawPointReader, RawPointWriter, RAW_HEADER_SIZE};
