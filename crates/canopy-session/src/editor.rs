//! The editor session: shared state, loader threads, and the mutation protocol.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use canopy_core::config::{CacheSettings, LayeredConfig};
use canopy_core::error::{CanopyError, ErrorKind, Result};
use canopy_core::formats::has_index;
use canopy_core::models::{
    CellHandle, ClassificationSettings, ClipFilter, DataSetId, EditorSettings, ViewSettings,
};
use canopy_store::Database;

use crate::controller::ConcurrencyController;

/// State shared between the control thread and the loaders
#[derive(Debug)]
pub struct EditorState {
    database: Database,
    settings: EditorSettings,
    /// Cell load failures not yet collected by the caller
    errors: Vec<CanopyError>,
    next_id: u64,
}

impl EditorState {
    fn new(database: Database) -> Self {
        Self { database, settings: EditorSettings::default(), errors: Vec::new(), next_id: 0 }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    /// Apply a clip filter to both the settings and the cache
    pub fn set_clip_filter(&mut self, filter: ClipFilter) {
        self.settings.clip_filter = filter;
        self.database.set_clip_filter(filter);
    }

    pub fn set_view_settings(&mut self, view: ViewSettings) {
        self.settings.view = view;
    }

    /// Apply a class filter to both the settings and the cache
    pub fn set_classification(&mut self, classification: ClassificationSettings) {
        self.database.set_classification(classification.clone());
        self.settings.classification = classification;
    }

    /// Drain the failures reported by background loads
    pub fn take_errors(&mut self) -> Vec<CanopyError> {
        std::mem::take(&mut self.errors)
    }
}

/// Exclusive access to [`EditorState`], released when dropped
pub struct EditorGuard<'a> {
    state: MutexGuard<'a, EditorState>,
}

impl Deref for EditorGuard<'_> {
    type Target = EditorState;

    fn deref(&self) -> &EditorState {
        &self.state
    }
}

impl DerefMut for EditorGuard<'_> {
    fn deref_mut(&mut self) -> &mut EditorState {
        &mut self.state
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<EditorState>,
    controller: ConcurrencyController,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An editing session
///
/// Loader threads start paused; call [`Editor::restart_threads`] (or any
/// mutation going through [`Editor::mutate`]) to begin loading.
pub struct Editor {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Editor {
    pub fn new(config: &LayeredConfig) -> Result<Self> {
        config.validate()?;
        Self::with_settings(config.cache_settings())
    }

    pub fn with_settings(settings: CacheSettings) -> Result<Self> {
        let threads = settings.worker_threads.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(EditorState::new(Database::with_settings(&settings))),
            controller: ConcurrencyController::new(threads),
        });

        let mut editor = Self { shared, workers: Vec::with_capacity(threads) };
        for i in 0..threads {
            let shared = Arc::clone(&editor.shared);
            let handle = thread::Builder::new()
                .name(format!("canopy-loader-{}", i))
                .spawn(move || run_loader(&shared))
                .map_err(CanopyError::Io)?;
            editor.workers.push(handle);
        }

        tracing::debug!(
            threads = threads,
            max_cells = settings.max_cells,
            "editor session started"
        );
        Ok(editor)
    }

    /// Stop background loading and wait until every loader is outside its
    /// work step
    ///
    /// Must not be called while holding an [`EditorGuard`].
    pub fn cancel_threads(&self) {
        self.shared.controller.cancel();
        tracing::debug!("cell loaders paused");
    }

    pub fn lock(&self) -> EditorGuard<'_> {
        EditorGuard { state: self.shared.state() }
    }

    /// Recompute the view and let loaders continue
    pub fn restart_threads(&self) {
        self.lock().database.update_view();
        self.shared.controller.resume();
    }

    /// Run `f` under the cancel, lock, restart sequence
    pub fn mutate<T>(&self, f: impl FnOnce(&mut EditorState) -> T) -> T {
        self.cancel_threads();
        let out = {
            let mut guard = self.lock();
            f(&mut guard)
        };
        self.restart_threads();
        out
    }

    /// Open an indexed file under the next free dataset id
    pub fn open_data_set(&self, path: impl AsRef<Path>) -> Result<DataSetId> {
        let path = path.as_ref();
        self.mutate(|state| {
            let id = DataSetId(state.next_id);
            state.database.open_data_set(id, path)?;
            state.next_id += 1;
            Ok(id)
        })
    }

    pub fn has_file_index(path: impl AsRef<Path>) -> bool {
        has_index(path)
    }

    pub fn set_visible_data_set(&self, id: DataSetId, visible: bool) -> Result<()> {
        self.mutate(|state| state.database.set_visible(id, visible))
    }

    pub fn remove_data_set(&self, id: DataSetId) -> Result<()> {
        self.mutate(|state| state.database.remove_data_set(id))
    }

    pub fn set_clip_filter(&self, filter: ClipFilter) {
        self.mutate(|state| state.set_clip_filter(filter));
    }

    pub fn reset_clip_filter(&self) {
        self.set_clip_filter(ClipFilter::default());
    }

    /// Load cells nearest to `focus` first
    pub fn set_focus(&self, focus: Option<[f64; 3]>) {
        self.mutate(|state| state.database.set_focus(focus));
    }

    pub fn set_view_settings(&self, view: ViewSettings) {
        self.mutate(|state| state.set_view_settings(view));
    }

    pub fn set_classification(&self, classification: ClassificationSettings) {
        self.mutate(|state| state.set_classification(classification));
    }

    pub fn classification(&self) -> ClassificationSettings {
        self.lock().settings.classification.clone()
    }

    pub fn view_settings(&self) -> ViewSettings {
        self.lock().settings.view.clone()
    }

    pub fn settings(&self) -> EditorSettings {
        self.lock().settings.clone()
    }

    /// Close every dataset and reset the settings
    pub fn close(&self) {
        self.mutate(|state| {
            state.database.clear();
            state.database.set_focus(None);
            state.set_clip_filter(ClipFilter::default());
            state.set_classification(ClassificationSettings::default());
            state.settings = EditorSettings::default();
            state.errors.clear();
            state.next_id = 0;
        });
        tracing::debug!("editor session closed");
    }

    /// Protect a cell from eviction while it is drawn
    pub fn pin(&self, handle: CellHandle) -> bool {
        self.lock().database.pin(handle)
    }

    /// Release a pin; loaders blocked on a full cache retry
    pub fn unpin(&self, handle: CellHandle) -> bool {
        let released = self.lock().database.unpin(handle);
        if released {
            self.shared.controller.notify_work();
        }
        released
    }

    /// Wait until the load queue is drained or blocked
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.controller.wait_idle(timeout)
    }

    pub fn active_workers(&self) -> usize {
        self.shared.controller.active_workers()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.shared.controller.shutdown();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("cell loader thread panicked");
            }
        }
    }
}

fn run_loader(shared: &Shared) {
    tracing::debug!("cell loader started");
    let mut idle_epoch = None;
    while let Some(step) = shared.controller.begin_step(idle_epoch) {
        idle_epoch = if load_next(shared) { None } else { Some(step.epoch()) };
    }
    tracing::debug!("cell loader stopped");
}

/// Load one queued cell; returns `false` when there was nothing to do
fn load_next(shared: &Shared) -> bool {
    if shared.controller.is_cancelled() {
        return false;
    }

    let ticket = {
        let mut state = shared.state();
        match state.database.begin_load() {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return false,
            Err(err) if err.kind() == ErrorKind::CacheExhausted => return false,
            Err(err) => {
                tracing::warn!(error = %err, "cell load could not start");
                state.errors.push(err);
                return false;
            }
        }
    };

    let result = Database::read_cell(&ticket);

    let mut state = shared.state();
    if shared.controller.is_cancelled() {
        state.database.abort_load(ticket);
        return false;
    }
    if let Err(err) = state.database.finish_load(ticket, result) {
        state.errors.push(err);
    }
    true
}
