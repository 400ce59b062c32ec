//! Fixed-capacity chunk store shared by a reader and its worker
//!
//! The store is split into two handles over the same slot table:
//!
//! - [`ChunkStore`]: owned by the reader (audio thread). Holds the key→slot
//!   index and the LRU clock, performs lookups and reserves slots for fetches.
//! - [`ChunkPublisher`]: owned by the worker. Publishes fetch results into
//!   slots the reader reserved.
//!
//! Each slot carries an atomic state and an atomic packed key. Sample data sits
//! behind a per-slot mutex that is only ever locked by the worker while the
//! slot is `Pending` and by the reader while it is `Ready`, so the reader's
//! `try_lock` never contends in practice. Publication stores the state with
//! `Release` after the data is written; the reader loads it with `Acquire`, so
//! a `Ready` slot always holds a complete chunk.
//!
//! All slots are allocated once at construction and recycled across tracks.
//! A generation bump makes every older entry invisible without touching the
//! table: lookups and eviction compare the stored generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use super::chunk::{ChunkKey, ChunkState, SlotId};
use crate::types::{StereoSample, TrackGeneration};

struct ChunkSlot {
    state: AtomicU8,
    key: AtomicU64,
    /// Valid frames in `data` (the last chunk of a track is short)
    frames: AtomicUsize,
    data: Mutex<Box<[StereoSample]>>,
}

impl ChunkSlot {
    fn new(chunk_frames: usize) -> Self {
        Self {
            state: AtomicU8::new(ChunkState::Free as u8),
            key: AtomicU64::new(0),
            frames: AtomicUsize::new(0),
            data: Mutex::new(vec![StereoSample::silence(); chunk_frames].into_boxed_slice()),
        }
    }

    fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn key(&self) -> ChunkKey {
        ChunkKey::unpack(self.key.load(Ordering::Acquire))
    }
}

struct StoreShared {
    slots: Box<[ChunkSlot]>,
    chunk_frames: usize,
    /// Generation the reader currently serves
    generation: AtomicU32,
}

/// Borrowed view of a `Ready` chunk
pub struct ChunkRef<'a> {
    data: MutexGuard<'a, Box<[StereoSample]>>,
    frames: usize,
}

impl ChunkRef<'_> {
    /// The valid frames of the chunk
    pub fn samples(&self) -> &[StereoSample] {
        &self.data[..self.frames]
    }

    pub fn frames(&self) -> usize {
        self.frames
    }
}

/// Result handed to [`ChunkPublisher::publish`]
#[derive(Debug, Clone, Copy)]
pub enum ChunkResult<'a> {
    /// Decoded frames (at most one chunk)
    Data(&'a [StereoSample]),
    /// The fetch failed
    Failed,
}

/// What became of a published result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Ready,
    Invalid,
    /// Stale generation or the slot no longer holds the key; slot freed
    Discarded,
}

/// Reader-side handle: lookup, reservation and LRU bookkeeping
pub struct ChunkStore {
    shared: Arc<StoreShared>,
    /// Key → slot for every slot the reader has reserved (bounded by capacity)
    index: HashMap<ChunkKey, usize>,
    /// LRU tick per slot
    last_used: Vec<u64>,
    tick: u64,
    generation: TrackGeneration,
}

/// Worker-side handle: publishes results into reserved slots
#[derive(Clone)]
pub struct ChunkPublisher {
    shared: Arc<StoreShared>,
}

impl ChunkStore {
    /// Allocate `capacity` slots of `chunk_frames` frames each
    pub fn new(chunk_frames: usize, capacity: usize) -> (ChunkStore, ChunkPublisher) {
        let slots: Box<[ChunkSlot]> = (0..capacity).map(|_| ChunkSlot::new(chunk_frames)).collect();
        let shared = Arc::new(StoreShared {
            slots,
            chunk_frames,
            generation: AtomicU32::new(TrackGeneration::NONE.0),
        });

        let store = ChunkStore {
            shared: shared.clone(),
            // Twice the slot count keeps inserts allocation-free
            index: HashMap::with_capacity(capacity * 2),
            last_used: vec![0; capacity],
            tick: 0,
            generation: TrackGeneration::NONE,
        };
        (store, ChunkPublisher { shared })
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn chunk_frames(&self) -> usize {
        self.shared.chunk_frames
    }

    pub fn generation(&self) -> TrackGeneration {
        self.generation
    }

    /// Switch to a new generation; all older entries become invisible
    pub fn set_generation(&mut self, generation: TrackGeneration) {
        self.generation = generation;
        self.shared.generation.store(generation.0, Ordering::Release);
    }

    fn slot_for(&self, key: ChunkKey) -> Option<usize> {
        let &slot = self.index.get(&key)?;
        (self.shared.slots[slot].key() == key).then_some(slot)
    }

    /// Slot currently holding `key`
    pub fn slot_of(&self, key: ChunkKey) -> Option<SlotId> {
        self.slot_for(key).map(SlotId)
    }

    /// State of the slot holding `key`, if any slot holds it
    pub fn state(&self, key: ChunkKey) -> Option<ChunkState> {
        self.slot_for(key).map(|slot| self.shared.slots[slot].state())
    }

    /// Borrow the data of a `Ready`, current-generation chunk (never blocks)
    pub fn lookup(&mut self, key: ChunkKey) -> Option<ChunkRef<'_>> {
        if key.generation != self.generation {
            return None;
        }
        let slot = self.slot_for(key)?;
        let entry = &self.shared.slots[slot];
        if entry.state() != ChunkState::Ready {
            return None;
        }

        let data = match entry.data.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };

        self.tick += 1;
        self.last_used[slot] = self.tick;
        Some(ChunkRef {
            data,
            frames: entry.frames.load(Ordering::Acquire),
        })
    }

    /// Reserve a slot for fetching `key`, marking it `Pending`
    ///
    /// Returns `None` when the key is already pending or cached, or when every
    /// slot is pending. Free and stale-generation slots are reused first,
    /// then the least recently used current-generation chunk is evicted.
    pub fn reserve_for_fetch(&mut self, key: ChunkKey) -> Option<SlotId> {
        if key.generation != self.generation {
            return None;
        }
        if let Some(state) = self.state(key) {
            if state != ChunkState::Free {
                return None;
            }
        }

        let victim = self.pick_victim()?;
        let slot = &self.shared.slots[victim];
        let previous = slot.key();
        let observed = slot.state.load(Ordering::Acquire);
        if observed == ChunkState::Pending as u8 {
            return None;
        }

        slot.key.store(key.pack(), Ordering::Release);
        if slot
            .state
            .compare_exchange(observed, ChunkState::Pending as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            slot.key.store(previous.pack(), Ordering::Release);
            return None;
        }

        if self.index.get(&previous) == Some(&victim) {
            self.index.remove(&previous);
        }
        self.index.insert(key, victim);
        self.tick += 1;
        self.last_used[victim] = self.tick;
        Some(SlotId(victim))
    }

    fn pick_victim(&self) -> Option<usize> {
        let mut lru: Option<(usize, u64)> = None;
        for (i, slot) in self.shared.slots.iter().enumerate() {
            match slot.state() {
                ChunkState::Free => return Some(i),
                ChunkState::Pending => continue,
                ChunkState::Ready | ChunkState::Invalid => {
                    if slot.key().generation != self.generation {
                        return Some(i);
                    }
                    if lru.map_or(true, |(_, tick)| self.last_used[i] < tick) {
                        lru = Some((i, self.last_used[i]));
                    }
                }
            }
        }
        lru.map(|(i, _)| i)
    }

    /// Undo a reservation whose fetch request never reached the worker
    pub fn cancel(&mut self, slot: SlotId) {
        let entry = &self.shared.slots[slot.0];
        let key = entry.key();
        if entry
            .state
            .compare_exchange(
                ChunkState::Pending as u8,
                ChunkState::Free as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
            && self.index.get(&key) == Some(&slot.0)
        {
            self.index.remove(&key);
        }
    }

    /// Number of slots currently in `state` (diagnostics)
    pub fn count(&self, state: ChunkState) -> usize {
        self.shared.slots.iter().filter(|s| s.state() == state).count()
    }
}

impl ChunkPublisher {
    pub fn chunk_frames(&self) -> usize {
        self.shared.chunk_frames
    }

    /// Whether `generation` is the one the reader currently serves
    pub fn is_current(&self, generation: TrackGeneration) -> bool {
        self.shared.generation.load(Ordering::Acquire) == generation.0
    }

    /// Publish the result of a fetch for `key` into `slot`
    ///
    /// Results for a stale generation are dropped and the slot is freed.
    pub fn publish(&self, slot: SlotId, key: ChunkKey, result: ChunkResult<'_>) -> PublishOutcome {
        let entry = &self.shared.slots[slot.0];
        if entry.state() != ChunkState::Pending || entry.key() != key {
            return PublishOutcome::Discarded;
        }
        if !self.is_current(key.generation) {
            entry.state.store(ChunkState::Free as u8, Ordering::Release);
            return PublishOutcome::Discarded;
        }

        let (frames, state) = match result {
            ChunkResult::Data(samples) => {
                let mut data = entry.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let frames = samples.len().min(data.len());
                data[..frames].copy_from_slice(&samples[..frames]);
                data[frames..].fill(StereoSample::silence());
                (frames, ChunkState::Ready)
            }
            ChunkResult::Failed => (0, ChunkState::Invalid),
        };

        entry.frames.store(frames, Ordering::Release);
        entry.state.store(state as u8, Ordering::Release);
        match state {
            ChunkState::Ready => PublishOutcome::Ready,
            _ => PublishOutcome::Invalid,
        }
    }

    /// Whether `slot` still waits for the fetch of `key`
    pub fn is_pending(&self, slot: SlotId, key: ChunkKey) -> bool {
        let entry = &self.shared.slots[slot.0];
        entry.state() == ChunkState::Pending && entry.key() == key
    }

    /// Release a reserved slot without publishing anything
    pub fn discard(&self, slot: SlotId, key: ChunkKey) {
        let entry = &self.shared.slots[slot.0];
        if entry.key() == key {
            let _ = entry.state.compare_exchange(
                ChunkState::Pending as u8,
                ChunkState::Free as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}
