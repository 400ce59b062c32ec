//! YAML config files
//!
//! Missing or unreadable files never stop the engine from starting: loading
//! falls back to defaults and logs why. Saving reports errors to the caller.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::EngineConfig;

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
    serde_yaml::from_str(&text).with_context(|| format!("Cannot parse {:?}", path))
}

/// Load a config file, or `T::default()` if it is missing or invalid
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }
    match read_yaml(path) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("{:#}; using defaults", e);
            T::default()
        }
    }
}

/// Load an engine config and reject out-of-range values
///
/// A file that parses but fails validation falls back to defaults as well.
pub fn load_engine_config(path: &Path) -> EngineConfig {
    let config: EngineConfig = load_config(path);
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            log::warn!("Invalid engine config in {:?}: {}; using defaults", path, e);
            EngineConfig::default()
        }
    }
}

/// Write `config` as YAML, creating parent directories as needed
pub fn save_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Cannot create {:?}", dir))?;
    }
    let yaml = serde_yaml::to_string(config).context("Cannot serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Cannot write {:?}", path))?;
    log::debug!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/path/engine.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.yaml");

        let mut config = EngineConfig::default();
        config.num_decks = 2;
        config.reader.chunk_frames = 16384;

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);

        assert_eq!(loaded.num_decks, 2);
        assert_eq!(loaded.reader.chunk_frames, 16384);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "sample_rate: 48000\nreader:\n  cache_chunks: 12\n").unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded.sample_rate, 48000);
        assert_eq!(loaded.reader.cache_chunks, 12);
        assert_eq!(loaded.reader.chunk_frames, EngineConfig::default().reader.chunk_frames);
    }

    #[test]
    fn test_invalid_yaml_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "num_decks: [not, a, number").unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, EngineConfig::default());
    }

    #[test]
    fn test_out_of_range_engine_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "reader:\n  chunk_frames: 1000\n").unwrap();

        assert_eq!(load_engine_config(&path), EngineConfig::default());
    }
}
