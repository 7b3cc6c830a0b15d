//! Layered configuration loading for CLI commands

use anyhow::{Context, Result};
use canopy_core::config::{CliConfigOverrides, LayeredConfig};
use std::path::{Path, PathBuf};

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "canopy.toml";

/// Resolve the configuration file: an explicit path must exist, the
/// default one is optional
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.is_file().then_some(default)
        }
    }
}

/// Defaults, then the file, then `CANOPY_*` variables, then CLI overrides
pub fn load_config(explicit: Option<&Path>, overrides: CliConfigOverrides) -> Result<LayeredConfig> {
    let mut config = LayeredConfig::with_defaults();
    if let Some(path) = config_path(explicit) {
        config = config
            .load_from_file(&path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?;
    }
    let mut config = config.load_from_env();
    config.update_from_cli(overrides);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
