//! Bounded cell cache over opened datasets.
//!
//! Cells live in an arena addressed by [`CellHandle`]; a dataset's cells are
//! contiguous. Evicting a cell drops its point buffer but keeps the slot and
//! its on-disk location, so the handle stays valid and the cell can be read
//! back later. Removed datasets leave tombstoned slots behind; handles are
//! never reused until [`Database::clear`].

use std::collections::VecDeque;
use std::ops::Range;
use std::path::Path;

use canopy_core::config::CacheSettings;
use canopy_core::error::{CanopyError, Result};
use canopy_core::formats::{index_path_for, read_layout};
use canopy_core::io::BinaryFile;
use canopy_core::models::{
    Cell, CellHandle, CellState, ClassificationSettings, ClipFilter, DataSet, DataSetId, Point,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ticket::LoadTicket;

/// Diagnostic counters, reset by [`Database::clear`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    /// Cells that reached Loaded
    pub loads: u64,
    pub evictions: u64,
    /// Cells that failed to load and were given up on
    pub failures: u64,
    /// Admissions refused with `CacheExhausted`
    pub deferrals: u64,
}

#[derive(Debug)]
struct DataSetEntry {
    data_set: DataSet,
    cells: Range<usize>,
}

#[derive(Debug)]
struct Slot {
    cell: Cell,
    last_used: u64,
    pins: u32,
    failed: bool,
    removed: bool,
    /// Priority in the current view, `None` when not relevant
    rank: Option<usize>,
}

impl Slot {
    fn evictable(&self) -> bool {
        self.cell.state() == CellState::Loaded && self.pins == 0
    }
}

#[derive(Debug)]
pub struct Database {
    data_sets: Vec<DataSetEntry>,
    slots: Vec<Slot>,
    /// Loaded cells in admission order
    loaded: Vec<CellHandle>,
    queue: VecDeque<CellHandle>,
    max_cells: usize,
    /// Loaded plus Loading cells
    resident: usize,
    high_water: usize,
    clock: u64,
    generation: u64,
    clip_filter: ClipFilter,
    classification: ClassificationSettings,
    focus: Option<[f64; 3]>,
    stats: DatabaseStats,
}

impl Database {
    pub fn new(max_cells: usize) -> Self {
        Self {
            data_sets: Vec::new(),
            slots: Vec::new(),
            loaded: Vec::new(),
            queue: VecDeque::new(),
            max_cells: max_cells.max(1),
            resident: 0,
            high_water: 0,
            clock: 0,
            generation: 0,
            clip_filter: ClipFilter::default(),
            classification: ClassificationSettings::default(),
            focus: None,
            stats: DatabaseStats::default(),
        }
    }

    pub fn with_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_cells)
    }

    /// Register the dataset imported from `path`, backed by its index file
    ///
    /// Fails with `IndexMissing` when no index exists next to `path`; the
    /// database is unchanged on every error.
    pub fn open_data_set(&mut self, id: DataSetId, path: impl AsRef<Path>) -> Result<&DataSet> {
        let path = path.as_ref();
        if self.entry(id).is_some() {
            return Err(CanopyError::DataSetExists { id: id.0 });
        }

        let index_path = index_path_for(path);
        if !BinaryFile::exists(&index_path) {
            return Err(CanopyError::IndexMissing { path: index_path });
        }
        let layout = read_layout(&index_path)?;

        let start = self.slots.len();
        for record in &layout.cells {
            self.slots.push(Slot {
                cell: Cell::new(id, *record),
                last_used: 0,
                pins: 0,
                failed: false,
                removed: false,
                rank: None,
            });
        }

        let data_set = DataSet {
            id,
            path: path.to_path_buf(),
            index_path,
            name: BinaryFile::file_name(path),
            date_created: Utc::now(),
            bounds: layout.header.bounds,
            point_count: layout.header.point_count,
            visible: true,
        };

        tracing::info!(
            dataset = id.0,
            path = %path.display(),
            cells = layout.cells.len(),
            points = layout.header.point_count,
            "dataset opened"
        );

        self.data_sets.push(DataSetEntry { data_set, cells: start..self.slots.len() });
        let entry = &self.data_sets[self.data_sets.len() - 1];
        Ok(&entry.data_set)
    }

    /// Release every dataset and cell and reset all counters
    pub fn clear(&mut self) {
        self.data_sets.clear();
        self.slots.clear();
        self.loaded.clear();
        self.queue.clear();
        self.resident = 0;
        self.high_water = 0;
        self.clock = 0;
        self.generation += 1;
        self.stats = DatabaseStats::default();
        tracing::debug!("database cleared");
    }

    /// Drop a dataset; its cells are released and their slots tombstoned
    pub fn remove_data_set(&mut self, id: DataSetId) -> Result<()> {
        let index = self
            .data_sets
            .iter()
            .position(|e| e.data_set.id == id)
            .ok_or(CanopyError::DataSetNotFound { id: id.0 })?;
        let entry = self.data_sets.remove(index);

        for i in entry.cells.clone() {
            let slot = &mut self.slots[i];
            if slot.cell.state() != CellState::Unloaded {
                self.resident -= 1;
            }
            slot.cell.unload();
            slot.removed = true;
            slot.rank = None;
            slot.pins = 0;
        }
        self.loaded.retain(|h| !entry.cells.contains(&h.index()));
        self.queue.retain(|h| !entry.cells.contains(&h.index()));

        tracing::info!(dataset = id.0, "dataset removed");
        Ok(())
    }

    pub fn set_visible(&mut self, id: DataSetId, visible: bool) -> Result<()> {
        let entry = self
            .data_sets
            .iter_mut()
            .find(|e| e.data_set.id == id)
            .ok_or(CanopyError::DataSetNotFound { id: id.0 })?;
        entry.data_set.visible = visible;
        Ok(())
    }

    pub fn set_clip_filter(&mut self, filter: ClipFilter) {
        self.clip_filter = filter;
    }

    pub fn clip_filter(&self) -> &ClipFilter {
        &self.clip_filter
    }

    /// Class filter applied by [`Database::visible_points`]; cell selection
    /// is spatial and does not depend on it
    pub fn set_classification(&mut self, classification: ClassificationSettings) {
        self.classification = classification;
    }

    pub fn classification(&self) -> &ClassificationSettings {
        &self.classification
    }

    /// Load cells nearest to `focus` first; `None` keeps file order
    pub fn set_focus(&mut self, focus: Option<[f64; 3]>) {
        self.focus = focus;
    }

    /// Recompute the relevant cell set from the view parameters
    ///
    /// Relevant cells are those of visible datasets that pass the clip
    /// filter and have not failed to load. Resident cells that are no
    /// longer relevant are evicted unless pinned, and the load queue is
    /// rebuilt in priority order.
    pub fn update_view(&mut self) {
        let mut relevant: Vec<(f64, usize)> = Vec::new();
        for entry in self.data_sets.iter().filter(|e| e.data_set.visible) {
            for i in entry.cells.clone() {
                let slot = &self.slots[i];
                if slot.failed || !self.clip_filter.accepts(slot.cell.bounds()) {
                    continue;
                }
                let distance = match self.focus {
                    Some(focus) => slot.cell.bounds().distance_squared(focus),
                    None => 0.0,
                };
                relevant.push((distance, i));
            }
        }
        relevant.sort_by(|a, b| a.0.total_cmp(&b.0));

        for slot in &mut self.slots {
            slot.rank = None;
        }
        self.clock += 1;
        for (rank, &(_, i)) in relevant.iter().enumerate() {
            let slot = &mut self.slots[i];
            slot.rank = Some(rank);
            if slot.cell.is_loaded() {
                slot.last_used = self.clock;
            }
        }

        let stale: Vec<CellHandle> = self
            .loaded
            .iter()
            .copied()
            .filter(|h| {
                let slot = &self.slots[h.index()];
                slot.rank.is_none() && slot.pins == 0
            })
            .collect();
        for handle in stale {
            self.evict(handle);
        }

        self.queue = relevant
            .iter()
            .map(|&(_, i)| i)
            .filter(|&i| self.slots[i].cell.state() == CellState::Unloaded)
            .map(|i| CellHandle(i as u32))
            .collect();
    }

    /// Take the next queued cell and reserve room for it
    ///
    /// Returns `Ok(None)` when nothing is queued and `CacheExhausted` when
    /// the cache is full of pinned or higher-priority cells; the cell stays
    /// queued in that case.
    pub fn begin_load(&mut self) -> Result<Option<LoadTicket>> {
        while let Some(&handle) = self.queue.front() {
            let slot = &self.slots[handle.index()];
            if slot.cell.state() != CellState::Unloaded || slot.failed || slot.removed {
                self.queue.pop_front();
                continue;
            }
            let rank = slot.rank;
            self.admit(rank)?;
            self.queue.pop_front();
            return Ok(Some(self.issue(handle)));
        }
        Ok(None)
    }

    /// Read a ticket's cell; no database state is touched
    pub fn read_cell(ticket: &LoadTicket) -> Result<Vec<Point>> {
        ticket.read()
    }

    /// Complete a load started with [`Database::begin_load`]
    ///
    /// A failed read marks the cell permanently failed for this session and
    /// returns the error; other cells are unaffected.
    pub fn finish_load(&mut self, ticket: LoadTicket, result: Result<Vec<Point>>) -> Result<()> {
        if !self.is_current(&ticket) {
            tracing::debug!(cell = %ticket.handle, "dropping stale load");
            return Ok(());
        }

        self.clock += 1;
        let slot = &mut self.slots[ticket.handle.index()];
        match result {
            Ok(points) => {
                slot.cell.mark_loaded(points);
                slot.last_used = self.clock;
                self.loaded.push(ticket.handle);
                self.stats.loads += 1;
                Ok(())
            }
            Err(err) => {
                slot.cell.unload();
                slot.failed = true;
                slot.rank = None;
                self.resident -= 1;
                self.stats.failures += 1;
                tracing::warn!(
                    dataset = ticket.data_set.0,
                    cell = %ticket.handle,
                    error = %err,
                    "cell failed to load"
                );
                Err(err)
            }
        }
    }

    /// Return an interrupted load to Unloaded and queue it again
    pub fn abort_load(&mut self, ticket: LoadTicket) {
        if !self.is_current(&ticket) {
            return;
        }
        let slot = &mut self.slots[ticket.handle.index()];
        slot.cell.unload();
        self.resident -= 1;
        if slot.rank.is_some() {
            self.queue.push_front(ticket.handle);
        }
    }

    /// Load one cell synchronously, evicting the least recently used
    /// unpinned cell if the cache is full
    pub fn load_cell(&mut self, handle: CellHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        if slot.failed {
            return Err(CanopyError::corrupt(
                &self.ticket_path(handle),
                format!("cell {} previously failed to load", handle),
            ));
        }
        match slot.cell.state() {
            CellState::Loaded => {
                self.clock += 1;
                self.slots[handle.index()].last_used = self.clock;
                return Ok(());
            }
            CellState::Loading => return Ok(()),
            CellState::Unloaded => {}
        }

        self.admit(None)?;
        let ticket = self.issue(handle);
        let result = ticket.read();
        self.finish_load(ticket, result)
    }

    /// Protect a cell from eviction while a renderer uses it
    pub fn pin(&mut self, handle: CellHandle) -> bool {
        match self.slots.get_mut(handle.index()) {
            Some(slot) if !slot.removed => {
                slot.pins += 1;
                true
            }
            _ => false,
        }
    }

    pub fn unpin(&mut self, handle: CellHandle) -> bool {
        match self.slots.get_mut(handle.index()) {
            Some(slot) if slot.pins > 0 => {
                slot.pins -= 1;
                true
            }
            _ => false,
        }
    }

    /// Number of Loaded cells
    pub fn cell_size(&self) -> usize {
        self.loaded.len()
    }

    /// Loaded cell at position `i`, in admission order
    pub fn cell(&self, i: usize) -> Option<&Cell> {
        self.loaded.get(i).map(|h| &self.slots[h.index()].cell)
    }

    /// Points of the loaded cell at position `i` whose class is enabled
    pub fn visible_points(&self, i: usize) -> impl Iterator<Item = &Point> + '_ {
        self.cell(i)
            .and_then(Cell::points)
            .unwrap_or_default()
            .iter()
            .filter(move |p| self.classification.accepts(p.classification))
    }

    pub fn handle_at(&self, i: usize) -> Option<CellHandle> {
        self.loaded.get(i).copied()
    }

    pub fn cell_by_handle(&self, handle: CellHandle) -> Option<&Cell> {
        self.slots.get(handle.index()).filter(|s| !s.removed).map(|s| &s.cell)
    }

    pub fn is_failed(&self, handle: CellHandle) -> bool {
        self.slots.get(handle.index()).is_some_and(|s| s.failed)
    }

    pub fn data_set(&self, id: DataSetId) -> Option<&DataSet> {
        self.entry(id).map(|e| &e.data_set)
    }

    pub fn data_sets(&self) -> impl Iterator<Item = &DataSet> {
        self.data_sets.iter().map(|e| &e.data_set)
    }

    /// Handles of every cell of a dataset, in file order
    pub fn cells_of(&self, id: DataSetId) -> Vec<CellHandle> {
        self.entry(id)
            .map(|e| e.cells.clone().map(|i| CellHandle(i as u32)).collect())
            .unwrap_or_default()
    }

    pub fn max_cells(&self) -> usize {
        self.max_cells
    }

    /// Loaded plus Loading cells
    pub fn resident(&self) -> usize {
        self.resident
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn stats(&self) -> DatabaseStats {
        self.stats
    }

    /// Cells waiting to be loaded
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn entry(&self, id: DataSetId) -> Option<&DataSetEntry> {
        self.data_sets.iter().find(|e| e.data_set.id == id)
    }

    fn slot(&self, handle: CellHandle) -> Result<&Slot> {
        self.slots
            .get(handle.index())
            .filter(|s| !s.removed)
            .ok_or_else(|| CanopyError::OutOfRange { offset: handle.0 as u64, size: self.slots.len() as u64 })
    }

    fn ticket_path(&self, handle: CellHandle) -> std::path::PathBuf {
        let data_set = self.slots[handle.index()].cell.data_set;
        self.data_set(data_set).map(|d| d.index_path.clone()).unwrap_or_default()
    }

    /// Make room for one more resident cell
    ///
    /// With a `rank`, only cells outside the view or of lower priority may
    /// be evicted; without one any unpinned Loaded cell may go.
    fn admit(&mut self, rank: Option<usize>) -> Result<()> {
        if self.resident < self.max_cells {
            return Ok(());
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.evictable())
            .filter(|(_, s)| match (rank, s.rank) {
                (Some(wanted), Some(held)) => held > wanted,
                _ => true,
            })
            .min_by_key(|(_, s)| (s.rank.is_some(), s.last_used, std::cmp::Reverse(s.rank)))
            .map(|(i, _)| CellHandle(i as u32));

        match victim {
            Some(handle) => {
                self.evict(handle);
                Ok(())
            }
            None => {
                self.stats.deferrals += 1;
                Err(CanopyError::CacheExhausted { resident: self.resident, maximum: self.max_cells })
            }
        }
    }

    fn issue(&mut self, handle: CellHandle) -> LoadTicket {
        let generation = self.generation;
        let slot = &mut self.slots[handle.index()];
        slot.cell.mark_loading();
        self.resident += 1;
        self.high_water = self.high_water.max(self.resident);

        let data_set = slot.cell.data_set;
        let record = slot.cell.record;
        LoadTicket {
            handle,
            data_set,
            path: self.ticket_path(handle),
            offset: record.offset,
            length: record.length,
            point_count: record.point_count,
            bounds: record.bounds,
            generation,
        }
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
            && self
                .slots
                .get(ticket.handle.index())
                .is_some_and(|s| !s.removed && s.cell.state() == CellState::Loading)
    }

    fn evict(&mut self, handle: CellHandle) {
        let slot = &mut self.slots[handle.index()];
        if slot.cell.state() != CellState::Loaded {
            return;
        }
        slot.cell.unload();
        self.resident -= 1;
        self.loaded.retain(|h| *h != handle);
        self.stats.evictions += 1;
        tracing::debug!(cell = %handle, dataset = slot.cell.data_set.0, "cell evicted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::config::BuildSettings;
    use canopy_core::formats::RawPointWriter;
    use canopy_index::SpatialIndexBuilder;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Four cells along x, 25 points each
    fn indexed_row(dir: &Path, name: &str, x0: f64) -> PathBuf {
        let input = dir.join(name);
        let mut writer = RawPointWriter::create(&input).unwrap();
        for i in 0..100 {
            writer.write_point(&Point::new(x0 + i as f64, (i % 3) as f64, 0.0)).unwrap();
        }
        writer.finish().unwrap();

        let settings = BuildSettings {
            randomize: false,
            seed: None,
            max_cell_points: 25,
            batch_points: 40,
            sort_run_bytes: 1 << 16,
        };
        let mut builder =
            SpatialIndexBuilder::start(index_path_for(&input), &input, settings).unwrap();
        while !builder.end() {
            builder.next().unwrap();
        }
        input
    }

    #[test]
    fn test_open_registers_cells() {
        let dir = TempDir::new().unwrap();
        let input = indexed_row(dir.path(), "row.raw", 0.0);

        let mut db = Database::new(8);
        let data_set = db.open_data_set(DataSetId(1), &input).unwrap();
        assert_eq!(data_set.point_count, 100);
        assert_eq!(data_set.name, "row.raw");
        assert!(data_set.visible);

        let cells = db.cells_of(DataSetId(1));
        assert_eq!(cells.len(), 4);
        assert!(cells.iter().all(|h| db.cell_by_handle(*h).unwrap().state() == CellState::Unloaded));
        assert_eq!(db.cell_size(), 0);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let input = indexed_row(dir.path(), "row.raw", 0.0);

        let mut db = Database::new(8);
        db.open_data_set(DataSetId(1), &input).unwrap();
        let err = db.open_data_set(DataSetId(1), &input).unwrap_err();
        assert!(matches!(err, CanopyError::DataSetExists { id: 1 }));
        assert_eq!(db.cells_of(DataSetId(1)).len(), 4);
    }

    #[test]
    fn test_update_view_queues_relevant_cells_by_focus() {
        let dir = TempDir::new().unwrap();
        let input = indexed_row(dir.path(), "row.raw", 0.0);

        let mut db = Database::new(8);
        db.open_data_set(DataSetId(1), &input).unwrap();
        db.set_focus(Some([100.0, 0.0, 0.0]));
        db.update_view();
        assert_eq!(db.queued(), 4);

        let first = db.begin_load().unwrap().unwrap();
        let last_cell = *db.cells_of(DataSetId(1)).last().unwrap();
        assert_eq!(first.handle, last_cell, "closest cell to the focus loads first");
        assert_eq!(db.resident(), 1);
        assert_eq!(db.cell_size(), 0, "loading cells are not yet visible");

        let points = Database::read_cell(&first).unwrap();
        db.finish_load(first, Ok(points)).unwrap();
        assert_eq!(db.cell_size(), 1);
        assert_eq!(db.cell(0).unwrap().points().unwrap().len(), 25);
    }

    #[test]
    fn test_hidden_data_set_is_evicted() {
        let dir = TempDir::new().unwrap();
        let input = indexed_row(dir.path(), "row.raw", 0.0);

        let mut db = Database::new(8);
        db.open_data_set(DataSetId(1), &input).unwrap();
        for handle in db.cells_of(DataSetId(1)) {
            db.load_cell(handle).unwrap();
        }
        assert_eq!(db.cell_size(), 4);

        db.set_visible(DataSetId(1), false).unwrap();
        db.update_view();
        assert_eq!(db.cell_size(), 0);
        assert_eq!(db.resident(), 0);
        assert_eq!(db.queued(), 0);
        assert_eq!(db.stats().evictions, 4);
    }

    #[test]
    fn test_abort_load_requeues() {
        let dir = TempDir::new().unwrap();
        let input = indexed_row(dir.path(), "row.raw", 0.0);

        let mut db = Database::new(8);
        db.open_data_set(DataSetId(1), &input).unwrap();
        db.update_view();

        let ticket = db.begin_load().unwrap().unwrap();
        let handle = ticket.handle;
        assert_eq!(db.queued(), 3);
        db.abort_load(ticket);

        assert_eq!(db.resident(), 0);
        assert_eq!(db.queued(), 4);
        assert_eq!(db.cell_by_handle(handle).unwrap().state(), CellState::Unloaded);
        assert_eq!(db.begin_load().unwrap().unwrap().handle, handle);
    }

    #[test]
    fn test_stale_ticket_after_clear_is_ignored() {
        let dir = TempDir::new().unwrap();
        let input = indexed_row(dir.path(), "row.raw", 0.0);

        let mut db = Database::new(8);
        db.open_data_set(DataSetId(1), &input).unwrap();
        db.update_view();
        let ticket = db.begin_load().unwrap().unwrap();
        let points = Database::read_cell(&ticket);

        db.clear();
        db.finish_load(ticket, points).unwrap();
        assert_eq!(db.resident(), 0);
        assert_eq!(db.cell_size(), 0);
        assert_eq!(db.data_sets().count(), 0);
        assert_eq!(db.stats(), DatabaseStats::default());
    }

    #[test]
    fn test_remove_data_set_tombstones_cells() {
        let dir = TempDir::new().unwrap();
        let a = indexed_row(dir.path(), "a.raw", 0.0);
        let b = indexed_row(dir.path(), "b.raw", 500.0);

        let mut db = Database::new(8);
        db.open_data_set(DataSetId(1), &a).unwrap();
        db.open_data_set(DataSetId(2), &b).unwrap();
        let removed = db.cells_of(DataSetId(1));
        db.load_cell(removed[0]).unwrap();

        db.remove_data_set(DataSetId(1)).unwrap();
        assert!(db.data_set(DataSetId(1)).is_none());
        assert!(db.cell_by_handle(removed[0]).is_none());
        assert_eq!(db.resident(), 0);

        let kept = db.cells_of(DataSetId(2));
        assert_eq!(kept[0].0, 4, "handles are not reused");
        assert!(matches!(
            db.remove_data_set(DataSetId(1)),
            Err(CanopyError::DataSetNotFound { id: 1 })
        ));
    }

    #[test]
    fn test_visible_points_follow_classification() {
        let dir = TempDir::new().unwrap();
        let input = indexed_row(dir.path(), "row.raw", 0.0);

        let mut db = Database::new(8);
        db.open_data_set(DataSetId(1), &input).unwrap();
        db.load_cell(db.cells_of(DataSetId(1))[0]).unwrap();
        assert_eq!(db.visible_points(0).count(), 0, "never-classified points are hidden");

        let mut classes = ClassificationSettings::default();
        classes.set_enabled(0, true);
        db.set_classification(classes);
        assert_eq!(db.visible_points(0).count(), 25);
        assert_eq!(db.cell(0).unwrap().points().unwrap().len(), 25);
        assert_eq!(db.visible_points(1).count(), 0);
    }
}
