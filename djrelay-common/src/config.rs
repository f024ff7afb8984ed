//! Configuration file resolution and loading
//!
//! Resolution order for the config file path:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config_dir>/djrelay/config.toml`)
//! 4. System config file (`/etc/djrelay/config.toml`, Linux only)
//!
//! When none of these yields a file, callers fall back to compiled defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application directory name used under the platform config directory
pub const APP_DIR: &str = "djrelay";

/// Locate the configuration file, or `None` when defaults should be used
///
/// An explicitly requested path (CLI or environment) must exist; a missing
/// explicit file is a configuration error rather than a silent fallback.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf()).map(Some);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_exists(PathBuf::from(path)).map(Some);
        }
    }

    // Priority 3/4: well-known locations
    Ok(default_config_locations().into_iter().find(|p| p.exists()))
}

fn require_exists(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", path)))
    }
}

/// Candidate config file locations for the platform, most specific first
pub fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join(APP_DIR).join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        locations.push(PathBuf::from("/etc").join(APP_DIR).join("config.toml"));
    }
    locations
}

/// Parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading configuration from {:?}", path);
    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str(&content)?;
    Ok(value)
}
