//! Integration tests for layered configuration
//!
//! These tests verify that configuration loading follows the correct precedence:
//! CLI arguments > Environment variables > Config file > Defaults

use canopy_core::config::{CliConfigOverrides, ConfigSource, LayeredConfig};
use canopy_core::CanopyError;
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn clear_env() {
    for var in [
        "CANOPY_CACHE_MAX_CELLS",
        "CANOPY_WORKER_THREADS",
        "CANOPY_MAX_CELL_POINTS",
        "CANOPY_BATCH_POINTS",
        "CANOPY_RANDOMIZE",
        "CANOPY_SORT_RUN_BYTES",
    ] {
        env::remove_var(var);
    }
}

#[test]
fn test_partial_file_configuration() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
worker_threads = 6
# Only override the thread count, leave others as defaults
"#
    )
    .unwrap();

    let config = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap();

    assert_eq!(config.worker_threads.value, 6);
    assert_eq!(config.worker_threads.source, ConfigSource::File);
    assert_eq!(config.cache_max_cells.value, 256);
    assert_eq!(config.cache_max_cells.source, ConfigSource::Default);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "cache_max_cells = 64\nbatch_points = 500").unwrap();

    env::set_var("CANOPY_CACHE_MAX_CELLS", "128");

    let config = LayeredConfig::with_defaults()
        .load_from_file(file.path())
        .unwrap()
        .load_from_env();

    assert_eq!(config.cache_max_cells.value, 128);
    assert_eq!(config.cache_max_cells.source, ConfigSource::Environment);
    assert_eq!(config.batch_points.value, 500);
    assert_eq!(config.batch_points.source, ConfigSource::File);

    clear_env();
}

#[test]
#[serial]
fn test_configuration_precedence_order() {
    clear_env();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "max_cell_points = 100").unwrap();
    env::set_var("CANOPY_MAX_CELL_POINTS", "200");

    let mut config = LayeredConfig::with_defaults()
        .load_from_file(file.path())
        .unwrap()
        .load_from_env();
    assert_eq!(config.max_cell_points.value, 200);

    config.update_from_cli(CliConfigOverrides {
        max_cell_points: Some(300),
        ..Default::default()
    });
    assert_eq!(config.max_cell_points.value, 300);
    assert_eq!(config.max_cell_points.source, ConfigSource::Cli);
    assert_eq!(config.builder_settings().max_cell_points, 300);

    clear_env();
}

#[test]
fn test_invalid_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "cache_max_cells = [not valid").unwrap();

    let result = LayeredConfig::with_defaults().load_from_file(file.path());
    assert!(matches!(result, Err(CanopyError::ConfigInvalid { .. })));
}

#[test]
fn test_wrong_value_type() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "randomize = \"sometimes\"").unwrap();

    let result = LayeredConfig::with_defaults().load_from_file(file.path());
    assert!(matches!(result, Err(CanopyError::ConfigInvalid { .. })));
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let result = LayeredConfig::with_defaults().load_from_file(dir.path().join("missing.toml"));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_full_configuration_workflow() {
    clear_env();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("canopy.toml");
    fs::write(&path, "cache_max_cells = 16\nworker_threads = 3\nsort_run_bytes = 1048576\n").unwrap();

    env::set_var("CANOPY_RANDOMIZE", "false");
    env::set_var("CANOPY_BATCH_POINTS", "-5");

    let mut config = LayeredConfig::with_defaults().load_from_file(&path).unwrap().load_from_env();
    config.update_from_cli(CliConfigOverrides { worker_threads: Some(1), ..Default::default() });
    config.validate().unwrap();

    let cache = config.cache_settings();
    assert_eq!(cache.max_cells, 16);
    assert_eq!(cache.worker_threads, 1);

    let build = config.builder_settings();
    assert!(!build.randomize);
    assert_eq!(build.batch_points, 100_000, "negative env value is ignored");
    assert_eq!(build.sort_run_bytes, 1 << 20);

    let map = config.to_inspection_map();
    assert_eq!(map["worker_threads"], ("1".to_string(), ConfigSource::Cli));
    assert_eq!(map["sort_run_bytes"], ("1 MiB".to_string(), ConfigSource::File));

    clear_env();
}
