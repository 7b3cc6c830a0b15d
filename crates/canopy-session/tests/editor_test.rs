//! Integration tests for the editor session and its loader threads

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use canopy_core::config::{BuildSettings, CacheSettings};
use canopy_core::error::ErrorKind;
use canopy_core::formats::{index_path_for, read_layout, RawPointWriter};
use canopy_core::io::BinaryFile;
use canopy_core::models::{
    Aabb, CellState, ClassificationSettings, ClipFilter, ColorSource, Point, ViewSettings,
    POINT_RECORD_SIZE,
};
use canopy_index::SpatialIndexBuilder;
use canopy_session::{Editor, EditorState};
use canopy_store::DatabaseStats;
use tempfile::TempDir;

const IDLE: Duration = Duration::from_secs(10);

/// A 40 x 40 plot offset by `x0`, indexed into 16 cells
fn indexed_plot(dir: &Path, name: &str, x0: f64) -> PathBuf {
    let input = dir.join(name);
    let mut writer = RawPointWriter::create(&input).unwrap();
    for i in 0..40 {
        for j in 0..40 {
            writer.write_point(&Point::new(x0 + i as f64, j as f64, (i % 4) as f64)).unwrap();
        }
    }
    writer.finish().unwrap();

    let settings = BuildSettings {
        seed: Some(5),
        max_cell_points: 100,
        batch_points: 500,
        ..Default::default()
    };
    let mut builder =
        SpatialIndexBuilder::start(index_path_for(&input), &input, settings).unwrap();
    while !builder.end() {
        builder.next().unwrap();
    }
    input
}

fn editor(max_cells: usize) -> Editor {
    Editor::with_settings(CacheSettings { max_cells, worker_threads: 2 }).unwrap()
}

fn loading_cells(state: &EditorState) -> usize {
    let db = state.database();
    db.data_sets()
        .flat_map(|d| db.cells_of(d.id))
        .filter(|h| db.cell_by_handle(*h).map(|c| c.state()) == Some(CellState::Loading))
        .count()
}

#[test]
fn test_loaders_fill_cache() {
    let dir = TempDir::new().unwrap();
    let editor = editor(64);
    assert_eq!(editor.worker_count(), 2);

    let id = editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();
    assert!(editor.wait_idle(IDLE));

    let state = editor.lock();
    assert_eq!(state.database().cell_size(), 16);
    assert_eq!(state.database().cells_of(id).len(), 16);
    assert_eq!(state.database().queued(), 0);
}

#[test]
fn test_full_cache_leaves_loaders_idle() {
    let dir = TempDir::new().unwrap();
    let editor = editor(4);
    editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();
    assert!(editor.wait_idle(IDLE), "loaders park when the cache is full");

    let state = editor.lock();
    assert_eq!(state.database().cell_size(), 4);
    assert_eq!(state.database().resident(), 4);
    assert!(state.database().queued() > 0);
    assert!(state.database().high_water() <= 4);
}

#[test]
fn test_no_writes_after_cancel_threads() {
    let dir = TempDir::new().unwrap();
    let editor = editor(256);
    for (i, name) in ["a.raw", "b.raw", "c.raw", "d.raw"].iter().enumerate() {
        let path = indexed_plot(dir.path(), name, i as f64 * 100.0);
        editor.open_data_set(path).unwrap();
    }

    for _ in 0..5 {
        editor.restart_threads();
        editor.cancel_threads();
        assert_eq!(editor.active_workers(), 0);

        let snapshot = |state: &EditorState| -> (DatabaseStats, usize, usize) {
            (state.database().stats(), state.database().resident(), state.database().cell_size())
        };
        let before = {
            let state = editor.lock();
            assert_eq!(loading_cells(&state), 0, "no cell is left half loaded");
            snapshot(&state)
        };
        thread::sleep(Duration::from_millis(30));
        let after = snapshot(&editor.lock());
        assert_eq!(before, after);
    }

    editor.restart_threads();
    assert!(editor.wait_idle(IDLE));
    assert_eq!(editor.lock().database().cell_size(), 64);
}

#[test]
fn test_missing_index_is_reported() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("plain.raw");
    RawPointWriter::create(&raw).unwrap().finish().unwrap();

    let editor = editor(8);
    assert!(!Editor::has_file_index(&raw));
    let err = editor.open_data_set(&raw).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexMissing);
    assert_eq!(editor.lock().database().data_sets().count(), 0);

    let indexed = indexed_plot(dir.path(), "a.raw", 0.0);
    assert!(Editor::has_file_index(&indexed));
    let id = editor.open_data_set(indexed).unwrap();
    assert_eq!(id.0, 0, "failed open does not consume an id");
}

#[test]
fn test_hiding_a_dataset_releases_its_cells() {
    let dir = TempDir::new().unwrap();
    let editor = editor(64);
    let a = editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();
    let b = editor.open_data_set(indexed_plot(dir.path(), "b.raw", 100.0)).unwrap();
    assert!(editor.wait_idle(IDLE));
    assert_eq!(editor.lock().database().cell_size(), 32);

    editor.set_visible_data_set(a, false).unwrap();
    assert!(editor.wait_idle(IDLE));
    {
        let state = editor.lock();
        let db = state.database();
        assert_eq!(db.cell_size(), 16);
        assert!((0..db.cell_size()).all(|i| db.cell(i).unwrap().data_set == b));
    }

    let err = editor.set_visible_data_set(canopy_core::models::DataSetId(9), true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
}

#[test]
fn test_removed_dataset_leaves_cache() {
    let dir = TempDir::new().unwrap();
    let editor = editor(64);
    let a = editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();
    let b = editor.open_data_set(indexed_plot(dir.path(), "b.raw", 100.0)).unwrap();
    assert!(editor.wait_idle(IDLE));

    editor.remove_data_set(a).unwrap();
    assert!(editor.wait_idle(IDLE));
    {
        let state = editor.lock();
        let db = state.database();
        assert!(db.data_set(a).is_none());
        assert_eq!(db.resident(), 16);
        assert!((0..db.cell_size()).all(|i| db.cell(i).unwrap().data_set == b));
    }

    assert_eq!(editor.remove_data_set(a).unwrap_err().kind(), ErrorKind::Other);
    let c = editor.open_data_set(indexed_plot(dir.path(), "c.raw", 200.0)).unwrap();
    assert_eq!(c.0, 2);
}

#[test]
fn test_clip_filter_and_reset() {
    let dir = TempDir::new().unwrap();
    let editor = editor(64);
    editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();

    let clip = ClipFilter::new(Aabb::new([0.0, 0.0, 0.0], [15.0, 15.0, 10.0]));
    editor.set_clip_filter(clip);
    assert!(editor.wait_idle(IDLE));
    {
        let state = editor.lock();
        assert_eq!(state.settings().clip_filter, clip);
        let db = state.database();
        assert!(db.cell_size() > 0 && db.cell_size() < 16);
        assert!((0..db.cell_size()).all(|i| clip.accepts(db.cell(i).unwrap().bounds())));
    }

    editor.reset_clip_filter();
    assert!(editor.wait_idle(IDLE));
    assert_eq!(editor.lock().database().cell_size(), 16);
    assert!(!editor.settings().clip_filter.enabled);
}

#[test]
fn test_unpin_lets_blocked_loads_continue() {
    let dir = TempDir::new().unwrap();
    let editor = editor(2);
    let id = editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();
    assert!(editor.wait_idle(IDLE));

    let cells = editor.lock().database().cells_of(id);
    let (first, second, last) = (cells[0], cells[1], cells[15]);
    assert!(editor.pin(first));
    assert!(editor.pin(second));

    editor.set_focus(Some([39.0, 39.0, 0.0]));
    assert!(editor.wait_idle(IDLE));
    {
        let state = editor.lock();
        let db = state.database();
        assert!(db.cell_by_handle(first).unwrap().is_loaded());
        assert!(db.cell_by_handle(second).unwrap().is_loaded());
        assert!(!db.cell_by_handle(last).unwrap().is_loaded());
    }

    assert!(editor.unpin(first));
    assert!(editor.wait_idle(IDLE));
    let state = editor.lock();
    let db = state.database();
    assert!(db.cell_by_handle(last).unwrap().is_loaded(), "nearest cell loaded once room appears");
    assert!(!db.cell_by_handle(first).unwrap().is_loaded());
    assert!(db.cell_by_handle(second).unwrap().is_loaded());
}

#[test]
fn test_corrupt_cell_does_not_stop_session() {
    let dir = TempDir::new().unwrap();
    let input = indexed_plot(dir.path(), "a.raw", 0.0);
    let index = index_path_for(&input);
    let record = read_layout(&index).unwrap().cells[7];
    let mut garbage = [0u8; POINT_RECORD_SIZE];
    Point::new(f64::NAN, 0.0, 0.0).encode(&mut garbage);
    BinaryFile::write_at(&index, &garbage, record.offset).unwrap();

    let editor = editor(64);
    editor.open_data_set(&input).unwrap();
    assert!(editor.wait_idle(IDLE));

    let mut state = editor.lock();
    assert_eq!(state.database().cell_size(), 15);
    assert_eq!(state.database().stats().failures, 1);
    let errors = state.take_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::Corrupt);
    assert!(state.take_errors().is_empty());
}

#[test]
fn test_classification_filters_drawn_points() {
    let dir = TempDir::new().unwrap();
    let editor = editor(64);
    editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();
    assert!(editor.wait_idle(IDLE));
    assert_eq!(editor.classification(), ClassificationSettings::default());

    let visible = |editor: &Editor| {
        let state = editor.lock();
        let db = state.database();
        let count: usize = (0..db.cell_size()).map(|i| db.visible_points(i).count()).sum();
        count
    };
    assert_eq!(visible(&editor), 0, "unclassified points are hidden by default");

    let mut classes = ClassificationSettings::default();
    classes.set_all_enabled(true);
    editor.set_classification(classes.clone());
    assert!(editor.wait_idle(IDLE));
    assert_eq!(editor.classification(), classes);
    assert_eq!(visible(&editor), 1600);
    {
        let state = editor.lock();
        assert_eq!(state.settings().classification, classes);
        assert_eq!(state.database().cell_size(), 16, "class filter does not evict cells");
    }

    editor.close();
    assert_eq!(editor.classification(), ClassificationSettings::default());
    assert_eq!(editor.lock().database().classification(), &ClassificationSettings::default());
}

#[test]
fn test_view_settings_and_close() {
    let dir = TempDir::new().unwrap();
    let editor = editor(64);
    editor.open_data_set(indexed_plot(dir.path(), "a.raw", 0.0)).unwrap();

    let mut view = ViewSettings::default();
    view.set_point_size(3.0);
    view.fog_enabled = true;
    view.set_color_source_enabled(ColorSource::Intensity, true);
    editor.set_view_settings(view.clone());
    assert_eq!(editor.view_settings(), view);

    editor.close();
    assert!(editor.wait_idle(IDLE));
    assert_eq!(editor.view_settings(), ViewSettings::default());
    {
        let state = editor.lock();
        assert_eq!(state.database().data_sets().count(), 0);
        assert_eq!(state.database().cell_size(), 0);
    }

    let id = editor.open_data_set(indexed_plot(dir.path(), "b.raw", 0.0)).unwrap();
    assert_eq!(id.0, 0);
}

#[test]
fn test_mutate_returns_closure_value() {
    let editor = editor(8);
    let max = editor.mutate(|state| state.database().max_cells());
    assert_eq!(max, 8);
    assert!(editor.wait_idle(IDLE));
}
