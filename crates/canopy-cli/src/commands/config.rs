//! Config command implementation

use crate::config::{config_path, load_config};
use crate::output::OutputWriter;
use crate::output_types::ConfigEntry;
use anyhow::Result;
use canopy_core::config::{CliConfigOverrides, ConfigSource};
use std::path::Path;
use tabled::Tabled;

pub fn execute(config_file: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let config = load_config(config_file, CliConfigOverrides::default())?;

    let mut entries: Vec<ConfigEntry> = config
        .to_inspection_map()
        .into_iter()
        .map(|(key, (value, source))| ConfigEntry {
            key,
            value,
            source: source_label(source).to_string(),
        })
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    output.section("Configuration");
    match config_path(config_file) {
        Some(path) => output.kv("File", path.display()),
        None => output.kv("File", "(none)"),
    }
    output.table(entries.iter().map(ConfigRow::from).collect());

    output.result(entries)
}

fn source_label(source: ConfigSource) -> &'static str {
    match source {
        ConfigSource::Default => "default",
        ConfigSource::File => "file",
        ConfigSource::Environment => "env",
        ConfigSource::Cli => "cli",
    }
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Source")]
    source: String,
}

impl From<&ConfigEntry> for ConfigRow {
    fn from(entry: &ConfigEntry) -> Self {
        Self { key: entry.key.clone(), value: entry.value.clone(), source: entry.source.clone() }
    }
}
