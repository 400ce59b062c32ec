//! Engine buffer - per-deck real-time playback state machine
//!
//! Owns the deck's caching reader and turns (position, rate, direction, loop,
//! scratch, keylock) into one output buffer per audio callback.
//!
//! ## Raw window
//!
//! Each block reads a contiguous *virtual* window of raw track frames in the
//! playback direction, starting `PAD` frames behind the read position so the
//! interpolators have history. Virtual index `v` maps to the real frame
//! `anchor + dir * (v - PAD)`, folded back into the loop when looping, so
//! the window is filled with a few contiguous `CachingReader::read` calls
//! and one callback can wrap a tight loop any number of times. Reverse
//! segments are read forwards and flipped in place.
//!
//! Non-keylocked playback interpolates the window at `PAD + frac + speed * i`.
//! Keylocked playback first resamples the window onto the engine-rate grid
//! (so a track at another sample rate keeps its pitch) and then time-stretches
//! it by the user rate alone. At unity rate the stretcher is bypassed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;

use super::interpolate::{read_interpolated, InterpolationMethod};
use super::scratch::ScratchState;
use crate::config::EngineConfig;
use crate::decoder::SourceOpener;
use crate::reader::{CachingReader, ReaderEvent, TrackState};
use crate::timestretch::TimeStretcher;
use crate::types::{DeckId, StereoBuffer, StereoSample, TrackGeneration};

/// History frames before the read position (sinc needs 3)
const PAD: usize = 3;
/// Frames after the last interpolated position (sinc needs 4)
const TAIL: usize = 4;
const RAW_SLACK: usize = PAD + TAIL + 2;

/// Below this speed a deck is considered stationary
const MIN_SPEED: f64 = 1e-9;

/// Playback state of a deck
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayState {
    Stopped = 0,
    Playing = 1,
    PlayingReverse = 2,
    /// Position driven by a scratch controller
    Scratching = 3,
}

impl PlayState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayState::Playing,
            2 => PlayState::PlayingReverse,
            3 => PlayState::Scratching,
            _ => PlayState::Stopped,
        }
    }
}

/// Loop markers (frames); orthogonal to the play state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopState {
    pub enabled: bool,
    pub loop_in: u64,
    pub loop_out: u64,
}

impl LoopState {
    /// Loop bounds when the loop is enabled and non-empty
    pub fn bounds(&self) -> Option<(f64, f64)> {
        (self.enabled && self.loop_out > self.loop_in)
            .then_some((self.loop_in as f64, self.loop_out as f64))
    }

    /// Loop length in frames
    pub fn frames(&self) -> u64 {
        self.loop_out.saturating_sub(self.loop_in)
    }
}

/// Lock-free playback snapshot for UI and meters
///
/// Written only by the audio thread at the end of every callback.
#[derive(Debug, Default)]
pub struct EngineBufferAtomics {
    position: AtomicU64,
    state: AtomicU8,
    /// Effective signed rate as f64 bits
    rate: AtomicU64,
    loop_enabled: AtomicBool,
    loop_in: AtomicU64,
    loop_out: AtomicU64,
    keylock: AtomicBool,
    load_failed: AtomicBool,
    track_frames: AtomicU64,
    generation: AtomicU32,
}

impl EngineBufferAtomics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Play position in track frames
    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Effective playback rate (negative in reverse)
    #[inline]
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loop_in(&self) -> u64 {
        self.loop_in.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loop_out(&self) -> u64 {
        self.loop_out.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn keylock(&self) -> bool {
        self.keylock.load(Ordering::Relaxed)
    }

    /// The loaded track failed to open or decode at the play position
    #[inline]
    pub fn load_failed(&self) -> bool {
        self.load_failed.load(Ordering::Relaxed)
    }

    /// Length of the loaded track in frames (0 until loaded)
    #[inline]
    pub fn track_frames(&self) -> u64 {
        self.track_frames.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn generation(&self) -> TrackGeneration {
        TrackGeneration(self.generation.load(Ordering::Relaxed))
    }
}

/// Maps virtual raw-window indices to real track frames
struct RawMap {
    /// Real frame of virtual index 0 (before loop folding)
    base: i64,
    forward: bool,
    /// Loop `[in, out)` the window folds into
    fold: Option<(i64, i64)>,
}

impl RawMap {
    fn new(anchor: i64, forward: bool, fold: Option<(i64, i64)>) -> Self {
        let base = if forward { anchor - PAD as i64 } else { anchor + PAD as i64 };
        Self { base, forward, fold }
    }

    fn real(&self, v: usize) -> i64 {
        let v = v as i64;
        if self.forward {
            let r = self.base + v;
            match self.fold {
                Some((lin, lout)) if r >= lout => lin + (r - lout) % (lout - lin),
                _ => r,
            }
        } else {
            let r = self.base - v;
            match self.fold {
                Some((lin, lout)) if r < lin => lout - 1 - (lin - 1 - r) % (lout - lin),
                _ => r,
            }
        }
    }

    /// Frames from `real` that stay contiguous in playback direction
    fn run_len(&self, real: i64, remaining: usize) -> usize {
        let limit = match self.fold {
            Some((_, lout)) if self.forward && real < lout => (lout - real) as usize,
            Some((lin, _)) if !self.forward && real >= lin => (real - lin + 1) as usize,
            _ => remaining,
        };
        remaining.min(limit).max(1)
    }
}

/// Per-deck playback engine
pub struct EngineBuffer {
    deck: DeckId,
    reader: CachingReader,
    engine_rate: f64,
    max_rate: f64,
    /// Play position in track frames (fractional)
    position: f64,
    /// User rate (1.0 nominal, negative plays backwards)
    rate: f64,
    reverse: bool,
    playing: bool,
    loop_state: LoopState,
    keylock: bool,
    interpolation: InterpolationMethod,
    scratch: ScratchState,
    stretcher: TimeStretcher,
    /// Direction last fed to the stretcher (0 = none since reset)
    stretch_direction: i8,
    /// Track frames from the position to the next stretcher input frame
    stretch_phase: f64,
    /// Raw window, allocated once
    raw: Vec<StereoSample>,
    /// Engine-rate stretcher input, allocated once
    stretch_in: Vec<StereoSample>,
    load_failed: bool,
    atomics: Arc<EngineBufferAtomics>,
}

impl EngineBuffer {
    /// Create a deck with its caching reader and worker thread
    ///
    /// `config` must already be validated.
    pub fn new(
        deck: DeckId,
        config: &EngineConfig,
        opener: Arc<dyn SourceOpener>,
        events: Sender<ReaderEvent>,
    ) -> Self {
        let raw_capacity = config.max_buffer_size * (config.max_rate.ceil() as usize) * 2 + RAW_SLACK;
        let atomics = Arc::new(EngineBufferAtomics::new());
        atomics.keylock.store(config.keylock, Ordering::Relaxed);
        atomics.rate.store(1.0f64.to_bits(), Ordering::Relaxed);

        Self {
            deck,
            reader: CachingReader::new(deck, &config.reader, opener, events),
            engine_rate: config.sample_rate as f64,
            max_rate: config.max_rate,
            position: 0.0,
            rate: 1.0,
            reverse: false,
            playing: false,
            loop_state: LoopState::default(),
            keylock: config.keylock,
            interpolation: config.interpolation,
            scratch: ScratchState::new(),
            stretcher: TimeStretcher::new_with_sample_rate(config.sample_rate),
            stretch_direction: 0,
            stretch_phase: 0.0,
            raw: vec![StereoSample::silence(); raw_capacity],
            stretch_in: vec![StereoSample::silence(); raw_capacity],
            load_failed: false,
            atomics,
        }
    }

    pub fn deck(&self) -> DeckId {
        self.deck
    }

    /// Lock-free snapshot handle for the UI
    pub fn atomics(&self) -> Arc<EngineBufferAtomics> {
        Arc::clone(&self.atomics)
    }

    pub fn reader(&self) -> &CachingReader {
        &self.reader
    }

    #[cfg(test)]
    pub(crate) fn reader_mut(&mut self) -> &mut CachingReader {
        &mut self.reader
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn keylock(&self) -> bool {
        self.keylock
    }

    pub fn interpolation(&self) -> InterpolationMethod {
        self.interpolation
    }

    pub fn is_load_failed(&self) -> bool {
        self.load_failed
    }

    pub fn play_state(&self) -> PlayState {
        if self.scratch.is_active() {
            PlayState::Scratching
        } else if !self.playing {
            PlayState::Stopped
        } else if self.direction() < 0.0 {
            PlayState::PlayingReverse
        } else {
            PlayState::Playing
        }
    }

    fn direction(&self) -> f64 {
        let sign = if self.rate < 0.0 { -1.0 } else { 1.0 };
        if self.reverse {
            -sign
        } else {
            sign
        }
    }

    fn track_frames(&self) -> Option<u64> {
        self.reader.stream_info().map(|info| info.total_frames)
    }

    /// Track sample rate relative to the engine rate
    fn rate_compensation(&self) -> f64 {
        match self.reader.stream_info() {
            Some(info) if info.sample_rate > 0 => info.sample_rate as f64 / self.engine_rate,
            _ => 1.0,
        }
    }

    /// Effective signed rate in track frames per output frame
    fn effective_rate(&self) -> f64 {
        self.rate.abs() * self.direction() * self.rate_compensation()
    }

    /// Largest speed one raw window can serve for a single output frame
    fn max_speed(&self) -> f64 {
        (self.raw.len() - RAW_SLACK) as f64
    }

    fn reset_transport(&mut self) {
        self.position = 0.0;
        self.playing = false;
        self.loop_state = LoopState::default();
        self.load_failed = false;
        self.scratch.end();
        self.reset_stretch();
    }

    fn reset_stretch(&mut self) {
        self.stretcher.reset();
        self.stretch_direction = 0;
        self.stretch_phase = 0.0;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Control (applied by the engine between callbacks)
    // ─────────────────────────────────────────────────────────────────────

    /// Load a track; playback state is reset
    pub fn load_track(&mut self, path: PathBuf) -> TrackGeneration {
        self.reset_transport();
        self.reader.load_track(path)
    }

    pub fn eject(&mut self) {
        self.reset_transport();
        self.reader.eject();
    }

    pub fn play(&mut self) {
        if !self.load_failed {
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn toggle_play(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to `position` (frames); cached chunks stay valid
    pub fn seek(&mut self, position: f64) {
        let mut target = position.max(0.0);
        if let Some(total) = self.track_frames() {
            target = target.min(total as f64);
        }
        self.position = target;
        self.reset_stretch();
        // The chunk under the play head goes ahead of any queued read-ahead
        self.reader.fetch_now(target as i64);
        let lookahead = self.reader.lookahead_frames();
        self.reader.hint(target as i64, lookahead);
    }

    /// Set the playback rate, clamped to the configured maximum
    pub fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() {
            self.rate = rate.clamp(-self.max_rate, self.max_rate);
        }
    }

    pub fn set_reverse(&mut self, reverse: bool) {
        self.reverse = reverse;
    }

    /// Set loop markers; an empty range disables the loop
    pub fn set_loop(&mut self, loop_in: u64, loop_out: u64, enabled: bool) {
        self.loop_state = LoopState {
            enabled: enabled && loop_out > loop_in,
            loop_in,
            loop_out,
        };
        if self.loop_state.enabled {
            let len = (self.loop_state.frames() as usize).min(self.reader.lookahead_frames());
            self.reader.hint(loop_in as i64, len);
        }
    }

    pub fn set_keylock(&mut self, enabled: bool) {
        if enabled != self.keylock {
            self.keylock = enabled;
            self.reset_stretch();
        }
    }

    pub fn set_interpolation(&mut self, method: InterpolationMethod) {
        self.interpolation = method;
    }

    /// Grab the platter at the current position
    pub fn scratch_start(&mut self) {
        self.scratch.start(self.position);
    }

    /// Move the platter to `position` (frames)
    pub fn scratch_move(&mut self, position: f64) {
        if self.scratch.is_active() {
            self.scratch.move_to(position);
        }
    }

    /// Release the platter; the previous play state resumes
    pub fn scratch_end(&mut self) {
        if self.scratch.is_active() {
            self.position = self.scratch.position().max(0.0);
            self.scratch.end();
            self.reset_stretch();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Audio callback
    // ─────────────────────────────────────────────────────────────────────

    /// Render one callback into `output`
    pub fn process(&mut self, output: &mut StereoBuffer) {
        self.reader.poll_status();
        self.check_failure();

        let loaded = matches!(self.reader.track_state(), TrackState::Loaded(_));
        let out = output.as_mut_slice();

        if !loaded || self.load_failed {
            out.fill(StereoSample::silence());
        } else if self.scratch.is_active() {
            self.process_scratch(out);
        } else if self.playing {
            let rate = self.effective_rate();
            self.render(out, rate, self.keylock);
        } else {
            out.fill(StereoSample::silence());
        }

        if loaded {
            self.hint_ahead();
        }
        self.sync_atomics();
    }

    fn check_failure(&mut self) {
        let failed = match self.reader.track_state() {
            TrackState::Failed => true,
            TrackState::Loaded(info) => {
                let end = self.reader.readable_end();
                end < info.total_frames && self.position >= end as f64
            }
            _ => false,
        };
        if failed && !self.load_failed {
            self.load_failed = true;
            self.playing = false;
            log::warn!("{} track unplayable at frame {}", self.deck, self.position as u64);
        }
    }

    fn process_scratch(&mut self, out: &mut [StereoSample]) {
        let frames = out.len();
        let motion = self.scratch.advance(frames);
        self.position = motion.from;
        if motion.audible {
            self.render(out, motion.rate(frames), false);
        } else {
            out.fill(StereoSample::silence());
        }

        let mut target = motion.to.max(0.0);
        if let Some(total) = self.track_frames() {
            target = target.min(total as f64);
        }
        self.position = target;
    }

    /// Loop bounds the transport obeys (none while scratching)
    fn active_loop(&self) -> Option<(f64, f64)> {
        if self.scratch.is_active() {
            None
        } else {
            self.loop_state.bounds()
        }
    }

    /// Loop the raw window folds into when reading from `pos`
    fn fold_for(&self, forward: bool, pos: f64) -> Option<(i64, i64)> {
        let (lin, lout) = self.active_loop()?;
        let applies = if forward { pos < lout } else { pos >= lin };
        applies.then_some((lin as i64, lout as i64))
    }

    /// Advance `pos` by `delta` frames, wrapping through an active loop
    fn advance(&self, pos: f64, delta: f64) -> f64 {
        let new = pos + delta;
        let Some((lin, lout)) = self.active_loop() else {
            return new;
        };
        let len = lout - lin;
        if delta >= 0.0 && pos < lout && new >= lout {
            lin + (new - lout) % len
        } else if delta < 0.0 && pos >= lin && new < lin {
            let back = (lin - new) % len;
            if back == 0.0 {
                lin
            } else {
                lout - back
            }
        } else {
            new
        }
    }

    /// Stop at the track edges; returns true when playback stopped
    fn stop_at_edges(&mut self, rate: f64) -> bool {
        let Some(total) = self.track_frames() else {
            return false;
        };
        let total = total as f64;
        if rate > 0.0 && self.position >= total {
            self.position = total;
        } else if rate < 0.0 && self.position <= 0.0 {
            self.position = 0.0;
        } else {
            return false;
        }
        self.playing = false;
        true
    }

    /// Fill raw[from..to] with the real frames the map assigns to them
    fn fill_raw(&mut self, map: &RawMap, from: usize, to: usize) {
        let mut v = from;
        while v < to {
            let real = map.real(v);
            let run = map.run_len(real, to - v);
            let window = &mut self.raw[v..v + run];
            if map.forward {
                self.reader.read(real, window);
            } else {
                self.reader.read(real - run as i64 + 1, window);
                window.reverse();
            }
            v += run;
        }
    }

    /// Render `out` at `rate` track frames per output frame, advancing position
    fn render(&mut self, out: &mut [StereoSample], rate: f64, keylock: bool) {
        let speed = rate.abs().min(self.max_speed());
        if speed < MIN_SPEED {
            out.fill(StereoSample::silence());
            return;
        }
        let rate = speed.copysign(rate);
        let compensation = self.rate_compensation();
        // Tempo relative to the engine rate; sample-rate compensation is not pitch
        let tempo = speed / compensation;
        let stretch = keylock && tempo != 1.0;

        let mut max_block = (self.max_speed() / speed).floor().max(1.0) as usize;
        if stretch {
            let direction = if rate < 0.0 { -1 } else { 1 };
            if self.stretch_direction != direction {
                self.reset_stretch();
                self.stretch_direction = direction;
            }
            self.stretcher.set_tempo(tempo);
            let input_capacity = (self.stretch_in.len() - 1) as f64;
            max_block = max_block.min((input_capacity / tempo).floor().max(1.0) as usize);
        } else if self.stretch_direction != 0 {
            self.reset_stretch();
        }

        let stop_at_edges = !self.scratch.is_active();
        let mut done = 0;
        while done < out.len() {
            let n = (out.len() - done).min(max_block);
            let block = &mut out[done..done + n];
            if stretch {
                self.render_stretched(block, rate, compensation);
            } else {
                self.render_resampled(block, rate);
            }
            done += n;

            if stop_at_edges && self.stop_at_edges(rate) {
                out[done..].fill(StereoSample::silence());
                break;
            }
        }
    }

    /// Anchor frame, fractional offset and raw map for the current position
    fn window(&self, forward: bool) -> (f64, RawMap) {
        let pos = self.position;
        let (anchor, frac) = if forward {
            (pos.floor(), pos - pos.floor())
        } else {
            (pos.ceil(), pos.ceil() - pos)
        };
        (frac, RawMap::new(anchor as i64, forward, self.fold_for(forward, pos)))
    }

    fn render_resampled(&mut self, block: &mut [StereoSample], rate: f64) {
        let n = block.len();
        let speed = rate.abs();
        let (frac, map) = self.window(rate > 0.0);

        if speed == 1.0 && frac == 0.0 {
            self.fill_raw(&map, PAD, PAD + n);
            block.copy_from_slice(&self.raw[PAD..PAD + n]);
        } else {
            let start = PAD as f64 + frac;
            let raw_len = (start + speed * (n - 1) as f64).floor() as usize + TAIL + 1;
            self.fill_raw(&map, 0, raw_len);
            let method = self.interpolation;
            let raw = &self.raw[..raw_len];
            for (i, sample) in block.iter_mut().enumerate() {
                *sample = read_interpolated(raw, start + speed * i as f64, method);
            }
        }

        self.position = self.advance(self.position, rate * n as f64);
    }

    fn render_stretched(&mut self, block: &mut [StereoSample], rate: f64, compensation: f64) {
        let n = block.len();
        let span = rate.abs() * n as f64;
        let (frac, map) = self.window(rate > 0.0);

        // Input frames sit every `compensation` track frames, starting
        // `stretch_phase` past the position, up to the end of this block's span
        let phase = self.stretch_phase;
        let frames_in = (((span - phase) / compensation).ceil().max(0.0) as usize).min(self.stretch_in.len());

        if frames_in > 0 {
            if compensation == 1.0 && frac == 0.0 && phase == 0.0 {
                self.fill_raw(&map, PAD, PAD + frames_in);
                self.stretch_in[..frames_in].copy_from_slice(&self.raw[PAD..PAD + frames_in]);
            } else {
                let start = PAD as f64 + frac + phase;
                let raw_len = (start + compensation * (frames_in - 1) as f64).floor() as usize + TAIL + 1;
                self.fill_raw(&map, 0, raw_len);
                let method = self.interpolation;
                let raw = &self.raw[..raw_len];
                for (j, sample) in self.stretch_in[..frames_in].iter_mut().enumerate() {
                    *sample = read_interpolated(raw, start + compensation * j as f64, method);
                }
            }
        }
        self.stretcher.process(&self.stretch_in[..frames_in], block);

        self.stretch_phase = (phase + compensation * frames_in as f64 - span).max(0.0);
        self.position = self.advance(self.position, rate * n as f64);
    }

    fn hint_ahead(&mut self) {
        let lookahead = self.reader.lookahead_frames();
        let pos = self.position as i64;
        if self.direction() < 0.0 {
            self.reader.hint(pos - lookahead as i64, lookahead + 1);
        } else {
            self.reader.hint(pos, lookahead);
        }
        if let Some((lin, lout)) = self.loop_state.bounds() {
            let len = ((lout - lin) as usize).min(lookahead);
            self.reader.hint(lin as i64, len);
        }
    }

    fn sync_atomics(&self) {
        let a = &self.atomics;
        a.position.store(self.position.max(0.0) as u64, Ordering::Relaxed);
        a.state.store(self.play_state() as u8, Ordering::Relaxed);
        a.rate.store(self.effective_rate().to_bits(), Ordering::Relaxed);
        a.loop_enabled.store(self.loop_state.enabled, Ordering::Relaxed);
        a.loop_in.store(self.loop_state.loop_in, Ordering::Relaxed);
        a.loop_out.store(self.loop_state.loop_out, Ordering::Relaxed);
        a.keylock.store(self.keylock, Ordering::Relaxed);
        a.load_failed.store(self.load_failed, Ordering::Relaxed);
        a.track_frames.store(self.track_frames().unwrap_or(0), Ordering::Relaxed);
        a.generation.store(self.reader.generation().0, Ordering::Relaxed);
    }
}
