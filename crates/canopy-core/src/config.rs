use crate::error::{CanopyError, Result};
use crate::io::DEFAULT_RUN_BYTES;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Configuration source for tracking where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Loaded from config file
    File,
    /// Loaded from environment variable
    Environment,
    /// Provided via CLI argument
    Cli,
}

impl ConfigSource {
    /// Returns the precedence level (higher = higher priority)
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::File => 1,
            ConfigSource::Environment => 2,
            ConfigSource::Cli => 3,
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    /// Update the value if the new source has higher precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source.precedence() > self.source.precedence() {
            self.value = value;
            self.source = source;
        }
    }
}

/// Settings consumed by the spatial index builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Shuffle points within each cell
    pub randomize: bool,
    /// Fixed shuffle seed; `None` draws one from the OS
    pub seed: Option<u64>,
    /// Target upper bound on points per cell
    pub max_cell_points: u64,
    /// Points processed per `next()` call
    pub batch_points: u64,
    /// Memory budget of one external sort run
    pub sort_run_bytes: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            randomize: true,
            seed: None,
            max_cell_points: 50_000,
            batch_points: 100_000,
            sort_run_bytes: DEFAULT_RUN_BYTES,
        }
    }
}

/// Settings consumed by the cell cache and its loader threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub max_cells: usize,
    pub worker_threads: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_cells: 256, worker_threads: 2 }
    }
}

/// Layered configuration for Canopy
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub cache_max_cells: ConfigValue<usize>,
    pub worker_threads: ConfigValue<usize>,
    pub max_cell_points: ConfigValue<u64>,
    pub batch_points: ConfigValue<u64>,
    pub randomize: ConfigValue<bool>,
    pub sort_run_bytes: ConfigValue<usize>,
}

impl Default for LayeredConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        let build = BuildSettings::default();
        let cache = CacheSettings::default();
        Self {
            cache_max_cells: ConfigValue::new(cache.max_cells, ConfigSource::Default),
            worker_threads: ConfigValue::new(cache.worker_threads, ConfigSource::Default),
            max_cell_points: ConfigValue::new(build.max_cell_points, ConfigSource::Default),
            batch_points: ConfigValue::new(build.batch_points, ConfigSource::Default),
            randomize: ConfigValue::new(build.randomize, ConfigSource::Default),
            sort_run_bytes: ConfigValue::new(build.sort_run_bytes, ConfigSource::Default),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| CanopyError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| CanopyError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        if let Some(v) = file_config.cache_max_cells {
            self.cache_max_cells.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.worker_threads {
            self.worker_threads.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.max_cell_points {
            self.max_cell_points.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.batch_points {
            self.batch_points.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.randomize {
            self.randomize.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.sort_run_bytes {
            self.sort_run_bytes.update(v, ConfigSource::File);
        }

        Ok(self)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        env_override(&mut self.cache_max_cells, "CANOPY_CACHE_MAX_CELLS", "a cell count");
        env_override(&mut self.worker_threads, "CANOPY_WORKER_THREADS", "a thread count");
        env_override(&mut self.max_cell_points, "CANOPY_MAX_CELL_POINTS", "a point count");
        env_override(&mut self.batch_points, "CANOPY_BATCH_POINTS", "a point count");
        env_override(&mut self.sort_run_bytes, "CANOPY_SORT_RUN_BYTES", "a byte count");

        if let Ok(raw) = env::var("CANOPY_RANDOMIZE") {
            match parse_bool(&raw) {
                Ok(v) => self.randomize.update(v, ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid CANOPY_RANDOMIZE value '{}': expected true or false",
                    raw
                ),
            }
        }

        self
    }

    /// Update configuration from CLI arguments
    pub fn update_from_cli(&mut self, overrides: CliConfigOverrides) {
        if let Some(v) = overrides.cache_max_cells {
            self.cache_max_cells.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.worker_threads {
            self.worker_threads.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.max_cell_points {
            self.max_cell_points.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.batch_points {
            self.batch_points.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.randomize {
            self.randomize.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.sort_run_bytes {
            self.sort_run_bytes.update(v, ConfigSource::Cli);
        }
    }

    /// Reject values the builder and cache cannot work with
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("cache_max_cells", self.cache_max_cells.value as u64),
            ("worker_threads", self.worker_threads.value as u64),
            ("max_cell_points", self.max_cell_points.value),
            ("batch_points", self.batch_points.value),
        ];
        for (key, value) in counts {
            if value == 0 {
                return Err(CanopyError::ConfigInvalid {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn builder_settings(&self) -> BuildSettings {
        BuildSettings {
            randomize: self.randomize.value,
            seed: None,
            max_cell_points: self.max_cell_points.value,
            batch_points: self.batch_points.value,
            sort_run_bytes: self.sort_run_bytes.value,
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            max_cells: self.cache_max_cells.value,
            worker_threads: self.worker_threads.value,
        }
    }

    /// Get all configuration values as a map for inspection
    pub fn to_inspection_map(&self) -> HashMap<String, (String, ConfigSource)> {
        let mut map = HashMap::new();

        map.insert(
            "cache_max_cells".to_string(),
            (self.cache_max_cells.value.to_string(), self.cache_max_cells.source),
        );
        map.insert(
            "worker_threads".to_string(),
            (self.worker_threads.value.to_string(), self.worker_threads.source),
        );
        map.insert(
            "max_cell_points".to_string(),
            (self.max_cell_points.value.to_string(), self.max_cell_points.source),
        );
        map.insert(
            "batch_points".to_string(),
            (self.batch_points.value.to_string(), self.batch_points.source),
        );
        map.insert("randomize".to_string(), (self.randomize.value.to_string(), self.randomize.source));
        map.insert(
            "sort_run_bytes".to_string(),
            (format_bytes(self.sort_run_bytes.value), self.sort_run_bytes.source),
        );

        map
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    cache_max_cells: Option<usize>,
    worker_threads: Option<usize>,
    max_cell_points: Option<u64>,
    batch_points: Option<u64>,
    randomize: Option<bool>,
    sort_run_bytes: Option<usize>,
}

/// CLI configuration overrides
#[derive(Debug, Default)]
pub struct CliConfigOverrides {
    pub cache_max_cells: Option<usize>,
    pub worker_threads: Option<usize>,
    pub max_cell_points: Option<u64>,
    pub batch_points: Option<u64>,
    pub randomize: Option<bool>,
    pub sort_run_bytes: Option<usize>,
}

fn env_override<T: FromStr>(value: &mut ConfigValue<T>, var: &str, expected: &str) {
    if let Ok(raw) = env::var(var) {
        match raw.trim().parse::<T>() {
            Ok(v) => value.update(v, ConfigSource::Environment),
            Err(_) => tracing::warn!("Invalid {} value '{}': expected {}", var, raw, expected),
        }
    }
}

/// Parse a boolean flag from string
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CanopyError::ConfigInvalid {
            key: "randomize".to_string(),
            reason: format!("Invalid boolean: {}. Use true or false", s),
        }),
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes >= 1 << 20 && bytes % (1 << 20) == 0 {
        format!("{} MiB", bytes >> 20)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LayeredConfig::with_defaults();
        assert_eq!(config.cache_max_cells.value, 256);
        assert_eq!(config.cache_max_cells.source, ConfigSource::Default);
        assert_eq!(config.worker_threads.value, 2);
        assert_eq!(config.max_cell_points.value, 50_000);
        assert_eq!(config.batch_points.value, 100_000);
        assert!(config.randomize.value);
        assert_eq!(config.sort_run_bytes.value, 64 << 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_precedence() {
        let mut value = ConfigValue::new(100, ConfigSource::Default);

        value.update(200, ConfigSource::File);
        assert_eq!(value.value, 200);
        assert_eq!(value.source, ConfigSource::File);

        value.update(300, ConfigSource::Environment);
        assert_eq!(value.value, 300);

        value.update(400, ConfigSource::Cli);
        assert_eq!(value.value, 400);
        assert_eq!(value.source, ConfigSource::Cli);

        // Lower precedence should not override
        value.update(500, ConfigSource::File);
        assert_eq!(value.value, 400);
        assert_eq!(value.source, ConfigSource::Cli);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
cache_max_cells = 64
max_cell_points = 1000
randomize = false
"#
        )
        .unwrap();

        let config = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap();

        assert_eq!(config.cache_max_cells.value, 64);
        assert_eq!(config.cache_max_cells.source, ConfigSource::File);
        assert_eq!(config.max_cell_points.value, 1000);
        assert!(!config.randomize.value);
        assert_eq!(config.worker_threads.source, ConfigSource::Default);
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "cache_cells = 64").unwrap();

        let err = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, CanopyError::ConfigInvalid { ref key, .. } if key == "file"));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = LayeredConfig::with_defaults();
        config.update_from_cli(CliConfigOverrides {
            worker_threads: Some(4),
            randomize: Some(false),
            ..Default::default()
        });

        assert_eq!(config.worker_threads.value, 4);
        assert_eq!(config.worker_threads.source, ConfigSource::Cli);
        assert!(!config.randomize.value);
        assert_eq!(config.batch_points.source, ConfigSource::Default);
    }

    #[test]
    #[serial]
    fn test_env_overrides_and_bad_values() {
        env::set_var("CANOPY_CACHE_MAX_CELLS", "32");
        env::set_var("CANOPY_WORKER_THREADS", "many");
        env::set_var("CANOPY_RANDOMIZE", "off");

        let config = LayeredConfig::with_defaults().load_from_env();

        env::remove_var("CANOPY_CACHE_MAX_CELLS");
        env::remove_var("CANOPY_WORKER_THREADS");
        env::remove_var("CANOPY_RANDOMIZE");

        assert_eq!(config.cache_max_cells.value, 32);
        assert_eq!(config.cache_max_cells.source, ConfigSource::Environment);
        assert_eq!(config.worker_threads.value, 2, "invalid values are ignored");
        assert_eq!(config.worker_threads.source, ConfigSource::Default);
        assert!(!config.randomize.value);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut config = LayeredConfig::with_defaults();
        config.update_from_cli(CliConfigOverrides { batch_points: Some(0), ..Default::default() });

        let err = config.validate().unwrap_err();
        assert!(matches!(err, CanopyError::ConfigInvalid { ref key, .. } if key == "batch_points"));
    }

    #[test]
    fn test_projected_settings() {
        let mut config = LayeredConfig::with_defaults();
        config.update_from_cli(CliConfigOverrides {
            cache_max_cells: Some(8),
            max_cell_points: Some(10),
            ..Default::default()
        });

        let build = config.builder_settings();
        assert_eq!(build.max_cell_points, 10);
        assert!(build.randomize);
        assert_eq!(build.seed, None);

        let cache = config.cache_settings();
        assert_eq!(cache, CacheSettings { max_cells: 8, worker_threads: 2 });
    }

    #[test]
    fn test_inspection_map() {
        let config = LayeredConfig::with_defaults();
        let map = config.to_inspection_map();

        assert_eq!(map.len(), 6);
        let (value, source) = &map["sort_run_bytes"];
        assert_eq!(value, "64 MiB");
        assert_eq!(*source, ConfigSource::Default);
        assert_eq!(map["randomize"].0, "true");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
