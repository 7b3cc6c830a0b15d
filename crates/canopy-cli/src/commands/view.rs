//! View command implementation

use crate::cli::ViewArgs;
use crate::config::load_config;
use crate::output::OutputWriter;
use crate::output_types::{DataSetView, ViewOutput};
use crate::progress::create_spinner;
use anyhow::{bail, Context, Result};
use canopy_core::config::CliConfigOverrides;
use canopy_core::models::{Aabb, ClassificationSettings, ClipFilter};
use canopy_session::{Editor, EditorState};
use std::path::Path;
use std::time::Duration;
use tabled::Tabled;

pub fn execute(args: ViewArgs, config_file: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let overrides = CliConfigOverrides {
        cache_max_cells: args.max_cells,
        worker_threads: args.threads,
        ..Default::default()
    };
    let config = load_config(config_file, overrides)?;
    let clip = args.clip.as_deref().map(clip_filter).transpose()?;
    let focus = args.focus.as_deref().map(point).transpose()?;
    let classes = args.classes.as_deref().map(classification);

    let editor = Editor::new(&config)?;
    for input in &args.inputs {
        if !Editor::has_file_index(input) {
            bail!(
                "{} has no spatial index. Run 'canopy import {}' first",
                input.display(),
                input.display()
            );
        }
        let id = editor
            .open_data_set(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        tracing::debug!(dataset = id.0, path = %input.display(), "dataset opened");
    }
    if let Some(filter) = clip {
        editor.set_clip_filter(filter);
    }
    if focus.is_some() {
        editor.set_focus(focus);
    }
    if let Some(classes) = classes {
        editor.set_classification(classes);
    }

    let spinner = (!output.is_json()).then(|| create_spinner("Loading cells..."));
    let settled = editor.wait_idle(Duration::from_secs(args.timeout));
    editor.cancel_threads();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let report = {
        let mut state = editor.lock();
        collect_report(&mut state, settled)
    };

    if !settled {
        output.warning(format!("Loading did not settle within {}s", args.timeout));
    }
    for error in &report.errors {
        output.warning(error);
    }

    output.section("Datasets");
    output.table(report.datasets.iter().map(DataSetRow::from).collect());
    output.kv("Resident cells", format!("{} of {}", report.resident_cells, report.max_cells));
    output.kv("High water", report.high_water);
    output.kv(
        "Loads / evictions / failures",
        format!(
            "{} / {} / {}",
            report.stats.loads, report.stats.evictions, report.stats.failures
        ),
    );

    output.result(report)
}

fn collect_report(state: &mut EditorState, settled: bool) -> ViewOutput {
    let errors = state.take_errors().iter().map(|e| e.to_string()).collect();
    let db = state.database();

    let datasets = db
        .data_sets()
        .map(|d| {
            let cells = db.cells_of(d.id);
            let loaded: Vec<_> = cells
                .iter()
                .filter_map(|h| db.cell_by_handle(*h))
                .filter(|c| c.is_loaded())
                .collect();
            let visible_points = (0..db.cell_size())
                .filter(|i| db.cell(*i).is_some_and(|c| c.data_set == d.id))
                .map(|i| db.visible_points(i).count() as u64)
                .sum();
            DataSetView {
                id: d.id.0,
                name: d.name.clone(),
                cells: cells.len(),
                loaded_cells: loaded.len(),
                loaded_points: loaded.iter().map(|c| c.point_count()).sum(),
                visible_points,
                point_count: d.point_count,
            }
        })
        .collect();

    ViewOutput {
        settled,
        max_cells: db.max_cells(),
        resident_cells: db.cell_size(),
        high_water: db.high_water(),
        classes: db.classification().enabled_classes().collect(),
        stats: db.stats(),
        datasets,
        errors,
    }
}

fn clip_filter(values: &[f64]) -> Result<ClipFilter> {
    match values {
        [x0, y0, z0, x1, y1, z1] => {
            let bounds = Aabb::new([*x0, *y0, *z0], [*x1, *y1, *z1]);
            if !bounds.is_valid() || bounds.is_empty() {
                bail!("--clip box is empty or not finite: {:?}", values);
            }
            Ok(ClipFilter::new(bounds))
        }
        _ => bail!("--clip needs six values, got {}", values.len()),
    }
}

/// Class filter enabling exactly `classes`
fn classification(classes: &[u8]) -> ClassificationSettings {
    let mut settings = ClassificationSettings::default();
    settings.set_all_enabled(false);
    for class in classes {
        settings.set_enabled(*class, true);
    }
    settings
}

fn point(values: &[f64]) -> Result<[f64; 3]> {
    match values {
        [x, y, z] if values.iter().all(|v| v.is_finite()) => Ok([*x, *y, *z]),
        _ => bail!("--focus needs three finite values, got {:?}", values),
    }
}

#[derive(Tabled)]
struct DataSetRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Cells")]
    cells: String,
    #[tabled(rename = "Points loaded")]
    points: String,
    #[tabled(rename = "Points drawn")]
    visible: u64,
}

impl From<&DataSetView> for DataSetRow {
    fn from(view: &DataSetView) -> Self {
        Self {
            id: view.id,
            name: view.name.clone(),
            cells: format!("{} / {}", view.loaded_cells, view.cells),
            points: format!("{} / {}", view.loaded_points, view.point_count),
            visible: view.visible_points,
        }
    }
}
