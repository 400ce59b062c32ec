//! Engine and reader tuning parameters
//!
//! Chunk size and cache capacity are not load-bearing for correctness; any
//! power-of-two chunk between 4096 and 65536 frames works. The defaults give
//! roughly 15 seconds of cached audio per deck at 44.1 kHz.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::InterpolationMethod;
use crate::types::{NUM_DECKS, SAMPLE_RATE};

/// Smallest allowed chunk size (frames)
pub const MIN_CHUNK_FRAMES: usize = 4096;
/// Largest allowed chunk size (frames)
pub const MAX_CHUNK_FRAMES: usize = 65536;

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("chunk_frames must be a power of two between {min} and {max}, got {value}")]
    ChunkFrames { value: usize, min: usize, max: usize },

    #[error("cache_chunks must be at least {min}, got {value}")]
    CacheChunks { value: usize, min: usize },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("max_rate must be between 1.0 and 8.0, got {0}")]
    MaxRate(f64),

    #[error("sample_rate {0} Hz is outside the supported 8000-192000 Hz range")]
    SampleRate(u32),
}

/// Caching reader configuration (per deck)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Frames per cached chunk
    pub chunk_frames: usize,
    /// Number of chunk slots in the store (fixed at startup)
    pub cache_chunks: usize,
    /// Chunks to prefetch ahead of the play position
    pub lookahead_chunks: usize,
    /// Capacity of the reader -> worker fetch queue
    pub request_queue_capacity: usize,
    /// Capacity of the worker -> reader status queue
    pub status_queue_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 8192,
            cache_chunks: 80,
            lookahead_chunks: 2,
            request_queue_capacity: 256,
            status_queue_capacity: 32,
        }
    }
}

impl ReaderConfig {
    /// Check the reader parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.chunk_frames.is_power_of_two()
            || !(MIN_CHUNK_FRAMES..=MAX_CHUNK_FRAMES).contains(&self.chunk_frames)
        {
            return Err(ConfigError::ChunkFrames {
                value: self.chunk_frames,
                min: MIN_CHUNK_FRAMES,
                max: MAX_CHUNK_FRAMES,
            });
        }
        // A read may touch two chunks, plus look-ahead, plus one in flight
        let min_chunks = 4 + self.lookahead_chunks;
        if self.cache_chunks < min_chunks {
            return Err(ConfigError::CacheChunks {
                value: self.cache_chunks,
                min: min_chunks,
            });
        }
        if self.request_queue_capacity == 0 {
            return Err(ConfigError::Zero { name: "request_queue_capacity" });
        }
        if self.status_queue_capacity == 0 {
            return Err(ConfigError::Zero { name: "status_queue_capacity" });
        }
        Ok(())
    }
}

/// Root engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate of the engine (Hz)
    pub sample_rate: u32,
    /// Number of decks (one caching reader + worker thread each)
    pub num_decks: usize,
    /// Largest callback size the engine pre-allocates for (frames)
    pub max_buffer_size: usize,
    /// Largest absolute playback rate (1.0 = nominal)
    pub max_rate: f64,
    /// Keylock state of freshly created decks
    pub keylock: bool,
    /// Interpolation used for non-keylocked variable-rate playback
    pub interpolation: InterpolationMethod,
    /// Capacity of the UI -> audio command queue
    pub command_queue_capacity: usize,
    /// Per-deck caching reader settings
    pub reader: ReaderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            num_decks: NUM_DECKS,
            max_buffer_size: 8192,
            max_rate: 4.0,
            keylock: false,
            interpolation: InterpolationMethod::default(),
            command_queue_capacity: 1024,
            reader: ReaderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check every parameter, including the nested reader config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if self.num_decks == 0 {
            return Err(ConfigError::Zero { name: "num_decks" });
        }
        if self.max_buffer_size == 0 {
            return Err(ConfigError::Zero { name: "max_buffer_size" });
        }
        if self.command_queue_capacity == 0 {
            return Err(ConfigError::Zero { name: "command_queue_capacity" });
        }
        if !(1.0..=8.0).contains(&self.max_rate) {
            return Err(ConfigError::MaxRate(self.max_rate));
        }
        self.reader.validate()
    }
}
