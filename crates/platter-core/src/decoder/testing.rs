//! Test fixtures: WAV writers and synthetic decoders

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{AudioDecoder, DecodeError, DecodedFrames, OpenError, SourceOpener, StreamInfo, TrackSource};
use crate::types::StereoSample;

/// Deterministic 16-bit test signal (sawtooth with a 1000-frame period)
pub fn mono_test_value(frame: u64) -> i16 {
    (((frame % 1000) as i32 - 500) * 30) as i16
}

/// Write a 16-bit mono WAV whose frame `n` holds `value(n)`
pub fn write_mono_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    frames: u64,
    value: impl Fn(u64) -> i16,
) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for n in 0..frames {
        writer.write_sample(value(n)).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// A latch that holds decoder threads until opened
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    /// Block until opened (gives up after five seconds)
    pub fn wait(&self) {
        let guard = self.open.lock().unwrap();
        let _unused = self
            .cond
            .wait_timeout_while(guard, Duration::from_secs(5), |open| !*open)
            .unwrap();
    }
}

/// Synthetic decoder: frame `n` is `(n, -n)`
///
/// Values are exact in f32 for any realistic track length, so tests can
/// compare output bit-for-bit.
#[derive(Clone)]
pub struct RampDecoder {
    total_frames: u64,
    sample_rate: u32,
    fail_from: Option<u64>,
    gate: Option<Arc<Gate>>,
    decode_calls: Arc<AtomicUsize>,
    /// Start frame of every decode call, in call order
    decode_log: Arc<Mutex<Vec<u64>>>,
}

impl RampDecoder {
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            sample_rate: 44100,
            fail_from: None,
            gate: None,
            decode_calls: Arc::new(AtomicUsize::new(0)),
            decode_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn frame_value(frame: u64) -> StereoSample {
        StereoSample::new(frame as f32, -(frame as f32))
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Any decode touching `frame` or later fails with a codec error
    pub fn failing_from(mut self, frame: u64) -> Self {
        self.fail_from = Some(frame);
        self
    }

    /// Every decode call blocks until `gate` opens
    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Shared counter of `decode_at` calls
    pub fn decode_calls(&self) -> Arc<AtomicUsize> {
        self.decode_calls.clone()
    }

    /// Shared log of the start frame of each `decode_at` call
    pub fn decode_log(&self) -> Arc<Mutex<Vec<u64>>> {
        self.decode_log.clone()
    }
}

impl AudioDecoder for RampDecoder {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            sample_rate: self.sample_rate,
            channels: 2,
            total_frames: self.total_frames,
        }
    }

    fn decode_at(
        &mut self,
        frame: u64,
        output: &mut [StereoSample],
    ) -> Result<DecodedFrames, DecodeError> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        self.decode_log.lock().unwrap().push(frame);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if let Some(fail_from) = self.fail_from {
            if frame + output.len() as u64 > fail_from {
                return Err(DecodeError::Codec(format!("corrupt data at frame {}", fail_from)));
            }
        }

        let frames = output.len().min(self.total_frames.saturating_sub(frame) as usize);
        for (i, out) in output[..frames].iter_mut().enumerate() {
            *out = Self::frame_value(frame + i as u64);
        }
        Ok(DecodedFrames {
            frames,
            end_of_stream: frame + frames as u64 >= self.total_frames,
        })
    }
}

/// Synthetic decoder: a stereo sine tone
#[derive(Clone)]
pub struct ToneDecoder {
    total_frames: u64,
    sample_rate: u32,
    frequency: f64,
}

impl ToneDecoder {
    pub fn new(frequency: f64, sample_rate: u32, total_frames: u64) -> Self {
        Self {
            total_frames,
            sample_rate,
            frequency,
        }
    }
}

impl AudioDecoder for ToneDecoder {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            sample_rate: self.sample_rate,
            channels: 2,
            total_frames: self.total_frames,
        }
    }

    fn decode_at(
        &mut self,
        frame: u64,
        output: &mut [StereoSample],
    ) -> Result<DecodedFrames, DecodeError> {
        let frames = output.len().min(self.total_frames.saturating_sub(frame) as usize);
        let step = std::f64::consts::TAU * self.frequency / self.sample_rate as f64;
        for (i, out) in output[..frames].iter_mut().enumerate() {
            *out = StereoSample::mono(((frame + i as u64) as f64 * step).sin() as f32 * 0.5);
        }
        Ok(DecodedFrames {
            frames,
            end_of_stream: frame + frames as u64 >= self.total_frames,
        })
    }
}

/// Sign changes of the left channel
pub fn zero_crossings(samples: &[StereoSample]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0].left < 0.0) != (w[1].left < 0.0))
        .count()
}

type DecoderFactory = Box<dyn Fn() -> Box<dyn AudioDecoder> + Send + Sync>;

/// Opener serving synthetic decoders by path; unknown paths are not found
#[derive(Default)]
pub struct ScriptedOpener {
    tracks: Mutex<HashMap<PathBuf, DecoderFactory>>,
    opens: AtomicUsize,
}

impl ScriptedOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve a fresh copy of `decoder` on every open of `path`
    pub fn add<D>(&self, path: impl Into<PathBuf>, decoder: D)
    where
        D: AudioDecoder + Clone + Sync + 'static,
    {
        let factory: DecoderFactory = Box::new(move || Box::new(decoder.clone()));
        self.tracks.lock().unwrap().insert(path.into(), factory);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SourceOpener for ScriptedOpener {
    fn open(&self, path: &Path) -> Result<TrackSource, OpenError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let decoder = self.tracks.lock().unwrap().get(path).map(|factory| factory());
        match decoder {
            Some(decoder) => TrackSource::new(path, decoder),
            None => Err(OpenError::NotFound {
                path: path.to_path_buf(),
            }),
        }
    }
}
