//! Platter Core - Chunked caching reader and real-time playback engine for DJ decks

pub mod config;
pub mod decoder;
pub mod engine;
pub mod reader;
pub mod timestretch;
pub mod types;

pub use types::*;
