//! Lock-free reader health counters
//!
//! Written by the reader (audio thread) and its worker, read by diagnostics.
//! Cache misses are not errors; these counters are the only place they show.

use std::sync::atomic::{AtomicU64, Ordering};

/// Health counters of one caching reader
#[derive(Debug, Default)]
pub struct ReaderHealth {
    missed_frames: AtomicU64,
    chunk_misses: AtomicU64,
    chunks_decoded: AtomicU64,
    chunks_failed: AtomicU64,
    stale_discards: AtomicU64,
    dropped_requests: AtomicU64,
}

/// Point-in-time copy of [`ReaderHealth`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Frames output as silence because their chunk was not cached
    pub missed_frames: u64,
    /// Chunk lookups that missed
    pub chunk_misses: u64,
    /// Chunks decoded and published
    pub chunks_decoded: u64,
    /// Chunks whose decode failed
    pub chunks_failed: u64,
    /// Fetches dropped because their track was replaced
    pub stale_discards: u64,
    /// Fetch requests lost to a full request queue
    pub dropped_requests: u64,
}

impl ReaderHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_miss(&self, frames: u64) {
        self.missed_frames.fetch_add(frames, Ordering::Relaxed);
        self.chunk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decoded(&self) {
        self.chunks_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_request(&self) {
        self.dropped_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn missed_frames(&self) -> u64 {
        self.missed_frames.load(Ordering::Relaxed)
    }

    pub fn chunks_decoded(&self) -> u64 {
        self.chunks_decoded.load(Ordering::Relaxed)
    }

    pub fn stale_discards(&self) -> u64 {
        self.stale_discards.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            missed_frames: self.missed_frames.load(Ordering::Relaxed),
            chunk_misses: self.chunk_misses.load(Ordering::Relaxed),
            chunks_decoded: self.chunks_decoded.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            dropped_requests: self.dropped_requests.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "missed {} frames in {} misses, decoded {}, failed {}, stale {}, dropped {}",
            self.missed_frames,
            self.chunk_misses,
            self.chunks_decoded,
            self.chunks_failed,
            self.stale_discards,
            self.dropped_requests
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let health = ReaderHealth::new();
        health.record_miss(512);
        health.record_miss(256);
        health.record_decoded();
        health.record_stale();

        let snap = health.snapshot();
        assert_eq!(snap.missed_frames, 768);
        assert_eq!(snap.chunk_misses, 2);
        assert_eq!(snap.chunks_decoded, 1);
        assert_eq!(snap.stale_discards, 1);
        assert_eq!(snap.dropped_requests, 0);
    }
}
