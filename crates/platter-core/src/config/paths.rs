//! Path utilities for platter configuration files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `~/.config/platter` (platform config dir), or `./platter` when
/// no config dir can be determined.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("platter")
}

/// Get the default config file path
///
/// # Arguments
/// * `filename` - Config file name (e.g., "engine.yaml")
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
