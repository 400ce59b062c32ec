//! Chunked caching reader
//!
//! Turns a disk-backed, compressed track into a randomly seekable sample
//! source the audio thread can read without blocking:
//!
//! ```text
//! audio thread                         worker thread (per deck)
//! ────────────                         ───────────────────────
//! CachingReader::read ──lookup──▶ ChunkStore ◀──publish── ReaderWorker
//!        │  miss: reserve + Fetch ──rtrb──────────────────▶  │ decode_at
//!        ◀──────────── ReaderStatus ──rtrb─────────────────  │
//!                                        ReaderEvent ──crossbeam──▶ UI
//! ```
//!
//! Every load bumps the reader's [`TrackGeneration`](crate::types::TrackGeneration);
//! chunks and in-flight fetches of older generations are invisible to lookups
//! and released by the worker on arrival.

mod caching_reader;
mod chunk;
mod event;
mod health;
mod store;
mod worker;

pub use caching_reader::{CachingReader, ReadResult, ReadStatus, TrackState};
pub use chunk::{ChunkKey, ChunkState, SlotId};
pub use event::{LoadFailure, ReaderEvent};
pub use health::{HealthSnapshot, ReaderHealth};
pub use store::{ChunkPublisher, ChunkRef, ChunkResult, ChunkStore, PublishOutcome};
pub use worker::{FetchRequest, Priority, ReaderStatus, WorkerRequest};
