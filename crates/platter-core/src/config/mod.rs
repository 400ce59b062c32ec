//! Engine configuration
//!
//! This module provides the tuning parameters of the reader and the playback
//! engine, plus generic YAML config loading/saving:
//!
//! - [`EngineConfig`] / [`ReaderConfig`]: chunk size, cache capacity, decks
//! - Generic YAML config loading/saving
//! - Default config file location
//!
//! # Usage
//!
//! ```ignore
//! use platter_core::config::{default_config_path, load_engine_config};
//!
//! let config = load_engine_config(&default_config_path("engine.yaml"));
//! let engine = AudioEngine::new(config)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{ConfigError, EngineConfig, ReaderConfig};
pub use io::{load_config, load_engine_config, save_config};
pub use paths::{default_config_dir, default_config_path};
