//! Chunk identity and slot states

use crate::types::TrackGeneration;

/// Identity of a cached chunk: `(generation, chunk index)`
///
/// Chunk `index` covers frames `[index * chunk_frames, (index + 1) * chunk_frames)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub generation: TrackGeneration,
    pub index: u32,
}

impl ChunkKey {
    pub fn new(generation: TrackGeneration, index: u32) -> Self {
        Self { generation, index }
    }

    /// Key of the chunk containing `frame`
    pub fn containing(generation: TrackGeneration, frame: u64, chunk_frames: usize) -> Self {
        Self::new(generation, (frame / chunk_frames as u64) as u32)
    }

    /// First frame covered by this chunk
    pub fn first_frame(&self, chunk_frames: usize) -> u64 {
        self.index as u64 * chunk_frames as u64
    }

    /// Pack into one word so a slot can hold its key in a single atomic
    pub(crate) fn pack(self) -> u64 {
        ((self.generation.0 as u64) << 32) | self.index as u64
    }

    pub(crate) fn unpack(packed: u64) -> Self {
        Self {
            generation: TrackGeneration((packed >> 32) as u32),
            index: packed as u32,
        }
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk {} ({})", self.index, self.generation)
    }
}

/// State of a chunk slot
///
/// Only the reader moves `Free`/`Ready`/`Invalid` slots to `Pending`; only the
/// worker moves `Pending` slots on to `Ready`, `Invalid` or (for stale
/// results) `Free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkState {
    /// Unused slot
    Free = 0,
    /// Fetch requested, not yet fulfilled
    Pending = 1,
    /// Valid, immutable data
    Ready = 2,
    /// Fetch failed
    Invalid = 3,
}

impl ChunkState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ChunkState::Pending,
            2 => ChunkState::Ready,
            3 => ChunkState::Invalid,
            _ => ChunkState::Free,
        }
    }
}

/// Index of a slot in the chunk store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}
