//! Playback engine - per-deck engine buffers and the engine that mixes them
//!
//! - EngineBuffer: real-time playback state machine on top of a caching reader
//!   (rate, reverse, loops, scratch, keylock)
//! - Interpolation for non-keylocked variable-rate playback
//! - Scratch motion smoothing
//! - Lock-free command queue from the control thread
//! - AudioEngine: owns the decks and sums them to the master output

mod command;
mod engine;
mod engine_buffer;
mod interpolate;
mod scratch;

pub use command::*;
pub use engine::*;
pub use engine_buffer::*;
pub use interpolate::*;
pub use scratch::*;
