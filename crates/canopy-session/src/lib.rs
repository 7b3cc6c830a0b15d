//! Editing session over a cell cache with background loader threads.
//!
//! Every settings change follows the same sequence: cancel the loaders,
//! take the lock, mutate, release, restart. [`Editor::mutate`] bundles it.

pub mod controller;
pub mod editor;

pub use controller::{ConcurrencyController, WorkStep};
pub use editor::{Editor, EditorGuard, EditorState};
