//! Audio-thread facade over the chunk store and its worker
//!
//! `read` never blocks: cached frames are copied, missing chunks are reserved
//! and queued for the worker, and their output region is silence. The worker
//! is woken with `Thread::unpark` after each push. A miss on a chunk that is
//! only queued as look-ahead re-queues it as urgent; the worker decodes
//! whichever copy it reaches first and skips the other.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};

use crossbeam::channel::Sender;

use super::chunk::{ChunkKey, ChunkState};
use super::event::{LoadFailure, ReaderEvent};
use super::health::ReaderHealth;
use super::store::ChunkStore;
use super::worker::{FetchRequest, Priority, ReaderStatus, ReaderWorker, WorkerContext, WorkerRequest};
use crate::config::ReaderConfig;
use crate::decoder::{SourceOpener, StreamInfo};
use crate::types::{DeckId, StereoSample, TrackGeneration};

/// Track state of the current generation as seen by the reader
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackState {
    /// Nothing loaded (or ejected)
    Empty,
    /// Load requested, the worker has not reported back yet
    Loading,
    Loaded(StreamInfo),
    /// Open failed; reads return silence until the next load
    Failed,
}

/// How much of a read was served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Every requested frame was filled with track data
    Available,
    /// Some frames were silence (cache miss, or outside the track)
    PartiallyAvailable,
    /// No frame was filled
    Unavailable,
}

/// Outcome of [`CachingReader::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    /// Frames filled with track data
    pub frames_filled: usize,
    /// In-track frames output as silence because their chunk was not cached
    pub frames_missed: usize,
    pub status: ReadStatus,
}

impl ReadResult {
    fn new(requested: usize, frames_filled: usize, frames_missed: usize) -> Self {
        let status = if frames_filled == 0 {
            ReadStatus::Unavailable
        } else if frames_filled == requested {
            ReadStatus::Available
        } else {
            ReadStatus::PartiallyAvailable
        };
        Self {
            frames_filled,
            frames_missed,
            status,
        }
    }
}

/// Per-deck caching reader
pub struct CachingReader {
    deck: DeckId,
    store: ChunkStore,
    /// Per slot: the pending fetch was queued as look-ahead
    lookahead_queued: Vec<bool>,
    lookahead_chunks: usize,
    requests: rtrb::Producer<WorkerRequest>,
    status: rtrb::Consumer<ReaderStatus>,
    events: Sender<ReaderEvent>,
    health: Arc<ReaderHealth>,
    generation: TrackGeneration,
    state: TrackState,
    /// End of the readable range `[0, readable_end)` in frames
    readable_end: u64,
    worker_thread: Thread,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl CachingReader {
    /// Create a reader and spawn its worker thread
    ///
    /// `config` must already be validated.
    pub fn new(
        deck: DeckId,
        config: &ReaderConfig,
        opener: Arc<dyn SourceOpener>,
        events: Sender<ReaderEvent>,
    ) -> Self {
        let (store, publisher) = ChunkStore::new(config.chunk_frames, config.cache_chunks);
        let (request_tx, request_rx) = rtrb::RingBuffer::new(config.request_queue_capacity);
        let (status_tx, status_rx) = rtrb::RingBuffer::new(config.status_queue_capacity);
        let health = Arc::new(ReaderHealth::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = ReaderWorker::new(WorkerContext {
            deck,
            requests: request_rx,
            status: status_tx,
            events: events.clone(),
            publisher,
            opener,
            health: health.clone(),
            shutdown: shutdown.clone(),
        });

        let handle = thread::Builder::new()
            .name(format!("reader-deck-{}", deck.display_number()))
            .spawn(move || worker.run())
            .expect("Failed to spawn reader worker thread");

        log::info!(
            "{} reader: {} chunks x {} frames",
            deck,
            config.cache_chunks,
            config.chunk_frames
        );

        Self {
            deck,
            lookahead_queued: vec![false; config.cache_chunks],
            store,
            lookahead_chunks: config.lookahead_chunks,
            requests: request_tx,
            status: status_rx,
            events,
            health,
            generation: TrackGeneration::NONE,
            state: TrackState::Empty,
            readable_end: 0,
            worker_thread: handle.thread().clone(),
            worker: Some(handle),
            shutdown,
        }
    }

    pub fn deck(&self) -> DeckId {
        self.deck
    }

    pub fn generation(&self) -> TrackGeneration {
        self.generation
    }

    pub fn track_state(&self) -> TrackState {
        self.state
    }

    /// Stream info of the loaded track, once the worker reported it
    pub fn stream_info(&self) -> Option<StreamInfo> {
        match self.state {
            TrackState::Loaded(info) => Some(info),
            _ => None,
        }
    }

    pub fn health(&self) -> &Arc<ReaderHealth> {
        &self.health
    }

    pub fn chunk_frames(&self) -> usize {
        self.store.chunk_frames()
    }

    /// Frames worth of look-ahead the engine should hint
    pub fn lookahead_frames(&self) -> usize {
        self.lookahead_chunks * self.store.chunk_frames()
    }

    /// End of the readable range (shrinks when a chunk fails to decode)
    pub fn readable_end(&self) -> u64 {
        self.readable_end
    }

    /// Start loading a track; returns the new generation
    ///
    /// The first chunk is reserved and sent along with the load so it decodes
    /// right after the file opens.
    pub fn load_track(&mut self, path: PathBuf) -> TrackGeneration {
        let generation = self.begin_generation();
        self.state = TrackState::Loading;

        let key = ChunkKey::new(generation, 0);
        let first_chunk = self.store.reserve_for_fetch(key).map(|slot| {
            self.lookahead_queued[slot.0] = false;
            FetchRequest {
                key,
                slot,
                priority: Priority::Urgent,
            }
        });

        let request = WorkerRequest::Load {
            generation,
            path,
            first_chunk,
        };
        if let Err(rtrb::PushError::Full(request)) = self.requests.push(request) {
            self.health.record_dropped_request();
            if let Some(fetch) = first_chunk {
                self.store.cancel(fetch.slot);
            }
            self.state = TrackState::Failed;
            if let WorkerRequest::Load { path, .. } = request {
                let _ = self.events.send(ReaderEvent::LoadFailed {
                    deck: self.deck,
                    generation,
                    failure: LoadFailure::LoadFailed(path),
                });
            }
        }
        self.worker_thread.unpark();
        generation
    }

    /// Unload the current track; cached chunks become invisible immediately
    pub fn eject(&mut self) {
        let generation = self.begin_generation();
        self.state = TrackState::Empty;
        if self.requests.push(WorkerRequest::Eject { generation }).is_err() {
            self.health.record_dropped_request();
        }
        self.worker_thread.unpark();
    }

    fn begin_generation(&mut self) -> TrackGeneration {
        self.generation = self.generation.next();
        self.store.set_generation(self.generation);
        self.readable_end = 0;
        self.generation
    }

    /// Apply worker status updates for the current generation
    pub fn poll_status(&mut self) {
        while let Ok(status) = self.status.pop() {
            match status {
                ReaderStatus::TrackLoaded { generation, info } if generation == self.generation => {
                    self.state = TrackState::Loaded(info);
                    self.readable_end = info.total_frames;
                }
                ReaderStatus::LoadFailed { generation } if generation == self.generation => {
                    self.state = TrackState::Failed;
                    self.readable_end = 0;
                }
                _ => {}
            }
        }
    }

    fn readable_range(&self, start: i64, frames: usize) -> Option<(u64, u64)> {
        let first = start.max(0) as u64;
        let end = start.saturating_add(frames as i64);
        if end <= 0 {
            return None;
        }
        let last = (end as u64).min(self.readable_end);
        (first < last).then_some((first, last))
    }

    fn request(&mut self, key: ChunkKey, priority: Priority) {
        let Some(slot) = self.store.reserve_for_fetch(key) else {
            return;
        };
        match self.requests.push(WorkerRequest::Fetch(FetchRequest { key, slot, priority })) {
            Ok(()) => {
                self.lookahead_queued[slot.0] = priority == Priority::Lookahead;
                self.worker_thread.unpark();
            }
            Err(_) => {
                self.store.cancel(slot);
                self.health.record_dropped_request();
            }
        }
    }

    /// Re-queue a chunk that is pending as look-ahead with urgent priority
    fn escalate(&mut self, key: ChunkKey) {
        let Some(slot) = self.store.slot_of(key) else {
            return;
        };
        if !self.lookahead_queued[slot.0] {
            return;
        }
        let fetch = FetchRequest {
            key,
            slot,
            priority: Priority::Urgent,
        };
        match self.requests.push(WorkerRequest::Fetch(fetch)) {
            Ok(()) => {
                self.lookahead_queued[slot.0] = false;
                self.worker_thread.unpark();
            }
            // The look-ahead copy is still queued
            Err(_) => self.health.record_dropped_request(),
        }
    }

    /// Queue the chunk containing `frame` ahead of all look-ahead work
    ///
    /// Used when the play position jumps, before the next `read` arrives.
    pub fn fetch_now(&mut self, frame: i64) {
        if !matches!(self.state, TrackState::Loaded(_)) {
            return;
        }
        let Some((first, _)) = self.readable_range(frame, 1) else {
            return;
        };
        let key = ChunkKey::containing(self.generation, first, self.store.chunk_frames());
        match self.store.state(key) {
            Some(ChunkState::Free) | None => self.request(key, Priority::Urgent),
            Some(ChunkState::Pending) => self.escalate(key),
            Some(ChunkState::Ready) | Some(ChunkState::Invalid) => {}
        }
    }

    /// Fill `output` with the frames starting at `start` (never blocks)
    ///
    /// Frames before 0, beyond the readable range, or in chunks that are not
    /// cached are silence. Missing chunks are queued for decoding.
    pub fn read(&mut self, start: i64, output: &mut [StereoSample]) -> ReadResult {
        self.poll_status();
        output.fill(StereoSample::silence());

        if !matches!(self.state, TrackState::Loaded(_)) {
            return ReadResult::new(output.len(), 0, 0);
        }
        let Some((first, last)) = self.readable_range(start, output.len()) else {
            return ReadResult::new(output.len(), 0, 0);
        };

        let chunk_frames = self.store.chunk_frames() as u64;
        let generation = self.generation;
        let mut filled = 0usize;
        let mut missed = 0usize;
        let mut pos = first;
        let mut last = last;

        while pos < last {
            let key = ChunkKey::containing(generation, pos, chunk_frames as usize);
            let chunk_start = key.first_frame(chunk_frames as usize);
            let span_end = (chunk_start + chunk_frames).min(last);
            let span = (span_end - pos) as usize;
            let out_offset = (pos as i64 - start) as usize;

            match self.store.state(key) {
                Some(ChunkState::Ready) => {
                    let mut short_chunk = None;
                    match self.store.lookup(key) {
                        Some(chunk) => {
                            let from = (pos - chunk_start) as usize;
                            let available = chunk.frames().saturating_sub(from).min(span);
                            output[out_offset..out_offset + available]
                                .copy_from_slice(&chunk.samples()[from..from + available]);
                            filled += available;
                            if available < span {
                                short_chunk = Some(chunk_start + chunk.frames() as u64);
                            }
                        }
                        None => {
                            missed += span;
                            self.health.record_miss(span as u64);
                        }
                    }
                    if let Some(end) = short_chunk {
                        // The decoder hit the end of the stream early
                        self.readable_end = self.readable_end.min(end);
                        last = last.min(end);
                    }
                }
                Some(ChunkState::Invalid) => {
                    self.readable_end = self.readable_end.min(chunk_start);
                    break;
                }
                Some(ChunkState::Pending) => {
                    missed += span;
                    self.health.record_miss(span as u64);
                    self.escalate(key);
                }
                Some(ChunkState::Free) | None => {
                    missed += span;
                    self.health.record_miss(span as u64);
                    self.request(key, Priority::Urgent);
                }
            }
            pos = span_end;
        }

        ReadResult::new(output.len(), filled, missed)
    }

    /// Queue look-ahead fetches for uncached chunks in the range
    pub fn hint(&mut self, start: i64, frames: usize) {
        if !matches!(self.state, TrackState::Loaded(_)) {
            return;
        }
        let Some((first, last)) = self.readable_range(start, frames) else {
            return;
        };

        let chunk_frames = self.store.chunk_frames();
        let first_index = first / chunk_frames as u64;
        let last_index = (last - 1) / chunk_frames as u64;
        for index in first_index..=last_index {
            let key = ChunkKey::new(self.generation, index as u32);
            if matches!(self.store.state(key), None | Some(ChunkState::Free)) {
                self.request(key, Priority::Lookahead);
            }
        }
    }
}

impl Drop for CachingReader {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.worker_thread.unpark();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("{} reader worker panicked", self.deck);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::decoder::testing::{mono_test_value, wait_until, write_mono_wav, Gate, RampDecoder, ScriptedOpener};
    use crate::decoder::{DefaultOpener, TrackSource};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn small_config() -> ReaderConfig {
        ReaderConfig {
            chunk_frames: 4096,
            cache_chunks: 16,
            ..ReaderConfig::default()
        }
    }

    fn reader_with(opener: Arc<dyn SourceOpener>) -> (CachingReader, crossbeam::channel::Receiver<ReaderEvent>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        let reader = CachingReader::new(DeckId(0), &small_config(), opener, tx);
        (reader, rx)
    }

    /// Read until the whole range is served from cache
    fn read_warm(reader: &mut CachingReader, start: i64, output: &mut [StereoSample]) -> ReadResult {
        let mut result = reader.read(start, output);
        wait_until(TIMEOUT, || {
            result = reader.read(start, output);
            result.frames_missed == 0 && result.status != ReadStatus::Unavailable
        });
        result
    }

    #[test]
    fn test_end_to_end_seek_matches_reference_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_mono_wav(dir.path(), "ten_seconds.wav", 44100, 441_000, mono_test_value);

        let (mut reader, _events) = reader_with(Arc::new(DefaultOpener));
        reader.load_track(path.clone());
        assert!(wait_until(TIMEOUT, || {
            reader.poll_status();
            matches!(reader.track_state(), TrackState::Loaded(_))
        }));

        let mut output = vec![StereoSample::silence(); 1024];
        let result = read_warm(&mut reader, 220_500, &mut output);
        assert_eq!(result.frames_filled, 1024);
        assert_eq!(result.status, ReadStatus::Available);

        let mut reference = vec![StereoSample::silence(); 1024];
        let mut source = TrackSource::open(&path).unwrap();
        source.decode_at(220_500, &mut reference).unwrap();
        assert_eq!(output, reference);
    }

    #[test]
    fn test_round_trip_across_chunk_boundaries() {
        let opener = ScriptedOpener::new();
        opener.add("ramp", RampDecoder::new(50_000));
        let (mut reader, _events) = reader_with(opener);
        reader.load_track(PathBuf::from("ramp"));

        let mut output = vec![StereoSample::silence(); 10_000];
        for &start in &[0i64, 4000, 8191, 30_000] {
            let result = read_warm(&mut reader, start, &mut output);
            assert_eq!(result.frames_filled, 10_000);
            for (i, s) in output.iter().enumerate() {
                assert_eq!(*s, RampDecoder::frame_value(start as u64 + i as u64));
            }
        }
    }

    #[test]
    fn test_miss_returns_silence_then_data() {
        let gate = Gate::new();
        let opener = ScriptedOpener::new();
        opener.add("slow", RampDecoder::new(100_000).gated(gate.clone()));
        let (mut reader, _events) = reader_with(opener);
        reader.load_track(PathBuf::from("slow"));
        assert!(wait_until(TIMEOUT, || {
            reader.poll_status();
            matches!(reader.track_state(), TrackState::Loaded(_))
        }));

        let mut output = vec![StereoSample::mono(9.0); 256];
        let result = reader.read(50_000, &mut output);
        assert_eq!(result.frames_filled, 0);
        assert_eq!(result.frames_missed, 256);
        assert!(output.iter().all(|s| *s == StereoSample::silence()));
        assert!(reader.health().missed_frames() >= 256);

        gate.open();
        let result = read_warm(&mut reader, 50_000, &mut output);
        assert_eq!(result.frames_filled, 256);
        assert_eq!(output[0], RampDecoder::frame_value(50_000));
    }

    #[test]
    fn test_boundary_reads() {
        let opener = ScriptedOpener::new();
        opener.add("short", RampDecoder::new(5000));
        let (mut reader, _events) = reader_with(opener);
        reader.load_track(PathBuf::from("short"));

        // Straddling the end
        let mut output = vec![StereoSample::silence(); 512];
        let result = read_warm(&mut reader, 4800, &mut output);
        assert_eq!(result.frames_filled, 200);
        assert_eq!(result.status, ReadStatus::PartiallyAvailable);
        assert_eq!(output[199], RampDecoder::frame_value(4999));
        assert_eq!(output[200], StereoSample::silence());

        // Entirely past the end
        let result = reader.read(6000, &mut output);
        assert_eq!(result, ReadResult::new(512, 0, 0));

        // Negative start: leading frames are silence, never fetched
        let result = read_warm(&mut reader, -100, &mut output);
        assert_eq!(result.frames_filled, 412);
        assert_eq!(output[99], StereoSample::silence());
        assert_eq!(output[100], RampDecoder::frame_value(0));

        let result = reader.read(-10_000, &mut output);
        assert_eq!(result.status, ReadStatus::Unavailable);
    }

    #[test]
    fn test_generation_isolation() {
        let gate = Gate::new();
        let opener = ScriptedOpener::new();
        let slow = RampDecoder::new(100_000).gated(gate.clone());
        let slow_calls = slow.decode_calls();
        opener.add("a", slow);
        opener.add("b", RampDecoder::new(100_000).with_sample_rate(48_000));
        let (mut reader, _events) = reader_with(opener);

        let first = reader.load_track(PathBuf::from("a"));
        // Wait until track A's first chunk is being decoded (blocked on the gate)
        assert!(wait_until(TIMEOUT, || slow_calls.load(Ordering::SeqCst) > 0));

        let second = reader.load_track(PathBuf::from("b"));
        assert_ne!(first, second);
        gate.open();

        let mut output = vec![StereoSample::silence(); 64];
        let result = read_warm(&mut reader, 0, &mut output);
        assert_eq!(result.frames_filled, 64);
        assert_eq!(reader.stream_info().map(|i| i.sample_rate), Some(48_000));
        for (i, s) in output.iter().enumerate() {
            assert_eq!(*s, RampDecoder::frame_value(i as u64));
        }
        assert!(wait_until(TIMEOUT, || reader.health().stale_discards() >= 1));
    }

    #[test]
    fn test_missing_file_reports_once_and_reads_silence() {
        let (mut reader, events) = reader_with(Arc::new(DefaultOpener));
        let path = PathBuf::from("/nonexistent/dir/missing.flac");
        reader.load_track(path.clone());

        let event = events.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(
            event,
            ReaderEvent::LoadFailed {
                deck: DeckId(0),
                generation: reader.generation(),
                failure: LoadFailure::FileNotFound(path),
            }
        );

        let mut output = vec![StereoSample::mono(1.0); 512];
        for _ in 0..5 {
            let result = reader.read(0, &mut output);
            assert_eq!(result.frames_filled, 0);
            assert!(output.iter().all(|s| *s == StereoSample::silence()));
        }
        assert_eq!(reader.track_state(), TrackState::Failed);
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_mid_stream_failure_shrinks_readable_range() {
        let opener = ScriptedOpener::new();
        // Chunk 2 (frames 8192..12288) and beyond are corrupt
        opener.add("broken", RampDecoder::new(40_000).failing_from(10_000));
        let (mut reader, events) = reader_with(opener);
        reader.load_track(PathBuf::from("broken"));

        let mut output = vec![StereoSample::silence(); 1024];
        let result = read_warm(&mut reader, 1000, &mut output);
        assert_eq!(result.frames_filled, 1024);

        // Touch the failing chunks until the reader observes the failure
        assert!(wait_until(TIMEOUT, || {
            reader.read(9000, &mut output);
            reader.read(20_000, &mut output);
            reader.readable_end() <= 8192
        }));
        assert_eq!(reader.readable_end(), 8192);

        let result = reader.read(9000, &mut output);
        assert_eq!(result, ReadResult::new(1024, 0, 0));

        let mut failures = 0;
        while let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
            if matches!(event, ReaderEvent::LoadFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_hint_prefetches_without_reading() {
        let opener = ScriptedOpener::new();
        opener.add("ramp", RampDecoder::new(100_000));
        let (mut reader, _events) = reader_with(opener);
        reader.load_track(PathBuf::from("ramp"));
        assert!(wait_until(TIMEOUT, || {
            reader.poll_status();
            matches!(reader.track_state(), TrackState::Loaded(_))
        }));

        reader.hint(40_000, 8192);
        // Chunks 9, 10 and 11 cover the hinted range
        assert!(wait_until(TIMEOUT, || reader.health().chunks_decoded() >= 4));

        let misses_before = reader.health().snapshot().chunk_misses;
        let mut output = vec![StereoSample::silence(); 8192];
        let result = reader.read(40_000, &mut output);
        assert_eq!(result.frames_filled, 8192);
        assert_eq!(reader.health().snapshot().chunk_misses, misses_before);
    }

    #[test]
    fn test_miss_on_lookahead_chunk_jumps_the_queue() {
        let gate = Gate::new();
        let opener = ScriptedOpener::new();
        let decoder = RampDecoder::new(1_000_000).gated(gate.clone());
        let log = decoder.decode_log();
        opener.add("slow", decoder);
        let (mut reader, _events) = reader_with(opener);
        reader.load_track(PathBuf::from("slow"));
        // Chunk 0 is held in the decoder while the queue fills up
        assert!(wait_until(TIMEOUT, || {
            reader.poll_status();
            matches!(reader.track_state(), TrackState::Loaded(_)) && !log.lock().unwrap().is_empty()
        }));

        reader.hint(4096, 10 * 4096);
        reader.hint(500_000, 1);
        let mut output = vec![StereoSample::silence(); 256];
        assert_eq!(reader.read(500_000, &mut output).frames_missed, 256);
        gate.open();

        assert!(wait_until(TIMEOUT, || log.lock().unwrap().len() >= 12));
        let log = log.lock().unwrap().clone();
        let chunk_start = 499_712;
        assert_eq!(log[0], 0);
        assert_eq!(log[1], chunk_start, "decode order {:?}", log);
        assert_eq!(log.iter().filter(|&&f| f == chunk_start).count(), 1);
    }

    #[test]
    fn test_fetch_now_goes_ahead_of_lookahead() {
        let gate = Gate::new();
        let opener = ScriptedOpener::new();
        let decoder = RampDecoder::new(1_000_000).gated(gate.clone());
        let log = decoder.decode_log();
        opener.add("slow", decoder);
        let (mut reader, _events) = reader_with(opener);
        reader.load_track(PathBuf::from("slow"));
        assert!(wait_until(TIMEOUT, || {
            reader.poll_status();
            matches!(reader.track_state(), TrackState::Loaded(_)) && !log.lock().unwrap().is_empty()
        }));

        reader.hint(4096, 6 * 4096);
        reader.fetch_now(300_000);
        gate.open();

        assert!(wait_until(TIMEOUT, || log.lock().unwrap().len() >= 8));
        let log = log.lock().unwrap().clone();
        assert_eq!(log[1], 299_008, "decode order {:?}", log);
    }

    #[test]
    fn test_eject_silences_reader() {
        let opener = ScriptedOpener::new();
        opener.add("ramp", RampDecoder::new(20_000));
        let (mut reader, events) = reader_with(opener);
        reader.load_track(PathBuf::from("ramp"));

        let mut output = vec![StereoSample::silence(); 128];
        read_warm(&mut reader, 0, &mut output);
        reader.eject();
        assert_eq!(reader.track_state(), TrackState::Empty);
        assert_eq!(reader.read(0, &mut output).frames_filled, 0);

        let unloaded = wait_until(TIMEOUT, || {
            matches!(events.try_recv(), Ok(ReaderEvent::TrackUnloaded { .. }))
        });
        assert!(unloaded);
    }
}
