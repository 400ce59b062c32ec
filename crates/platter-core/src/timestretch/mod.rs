//! Keylock time-stretching via signalsmith-stretch
//!
//! With keylock engaged the engine buffer resamples `tempo * len` frames per
//! callback onto the engine-rate grid and stretches them to `len` output
//! frames, so tempo changes while pitch stays put. The effective ratio is given by the buffer sizes; `tempo`
//! is tracked for the engine's bookkeeping and for resets.

use signalsmith_stretch::Stretch;

use crate::types::{StereoSample, SAMPLE_RATE};

const CHANNELS: u32 = 2;

/// Smallest and largest tempo the stretcher is driven with
pub const MIN_TEMPO: f64 = 0.05;
pub const MAX_TEMPO: f64 = 8.0;

/// Pitch-preserving tempo changer for one deck
pub struct TimeStretcher {
    stretcher: Stretch,
    sample_rate: u32,
    tempo: f64,
}

impl TimeStretcher {
    pub fn new_with_sample_rate(sample_rate: u32) -> Self {
        Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            sample_rate,
            tempo: 1.0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Set the tempo ratio (input frames per output frame)
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo.abs().clamp(MIN_TEMPO, MAX_TEMPO);
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Input plus output latency in frames
    pub fn latency(&self) -> usize {
        self.stretcher.input_latency() + self.stretcher.output_latency()
    }

    /// Drop buffered audio (after seeks, loads and direction changes)
    pub fn reset(&mut self) {
        self.stretcher.reset();
    }

    /// Stretch `input` to exactly `output.len()` frames
    ///
    /// StereoSample is `#[repr(C)]` so both slices are viewed as interleaved
    /// f32 without copying.
    pub fn process(&mut self, input: &[StereoSample], output: &mut [StereoSample]) {
        let out: &mut [f32] = bytemuck::cast_slice_mut(output);
        out.fill(0.0);
        if input.is_empty() {
            return;
        }
        let inp: &[f32] = bytemuck::cast_slice(input);
        self.stretcher.process(inp, out);
    }
}

impl Default for TimeStretcher {
    fn default() -> Self {
        Self::new_with_sample_rate(SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_is_clamped() {
        let mut stretcher = TimeStretcher::default();
        assert_eq!(stretcher.tempo(), 1.0);
        stretcher.set_tempo(-1.5);
        assert_eq!(stretcher.tempo(), 1.5);
        stretcher.set_tempo(100.0);
        assert_eq!(stretcher.tempo(), MAX_TEMPO);
        assert!(stretcher.latency() > 0);
    }

    #[test]
    fn test_process_fills_requested_length() {
        let mut stretcher = TimeStretcher::new_with_sample_rate(48_000);
        let input: Vec<StereoSample> = (0..768)
            .map(|i| StereoSample::mono((i as f32 * 0.05).sin() * 0.5))
            .collect();
        let mut output = vec![StereoSample::mono(7.0); 512];

        for _ in 0..40 {
            stretcher.process(&input, &mut output);
        }
        assert!(output.iter().all(|s| s.left.is_finite() && s.left.abs() < 2.0));
        assert!(output.iter().any(|s| s.left != 0.0));
    }

    #[test]
    fn test_empty_input_gives_silence() {
        let mut stretcher = TimeStretcher::default();
        let mut output = vec![StereoSample::mono(1.0); 64];
        stretcher.process(&[], &mut output);
        assert!(output.iter().all(|s| *s == StereoSample::silence()));
    }
}
