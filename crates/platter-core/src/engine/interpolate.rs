//! Fractional-position sample interpolation
//!
//! Used by the engine buffer for every non-keylocked rate other than exactly
//! 1.0. The caller guarantees the source window carries `taps().0` frames of
//! history before and `taps().1` frames after the interpolated position;
//! anything outside the slice reads as silence.

use serde::{Deserialize, Serialize};

use crate::types::StereoSample;

/// Interpolation method for variable-rate playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// 2-point linear
    Linear,
    /// 4-point Catmull-Rom
    #[default]
    Cubic,
    /// 8-tap Blackman-Harris windowed sinc
    Sinc,
}

impl InterpolationMethod {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Linear => "Linear (Fast)",
            Self::Cubic => "Cubic (Good)",
            Self::Sinc => "Sinc (Best)",
        }
    }

    pub fn all() -> &'static [Self] {
        &[Self::Linear, Self::Cubic, Self::Sinc]
    }

    /// Frames needed before and after the integer part of a position
    pub fn taps(&self) -> (usize, usize) {
        match self {
            Self::Linear => (0, 1),
            Self::Cubic => (1, 2),
            Self::Sinc => (3, 4),
        }
    }
}

const SINC_HALF_WIDTH: f64 = 4.0;

/// Blackman-Harris windowed sinc kernel over [-4, 4]
#[inline]
fn sinc_kernel(x: f64) -> f64 {
    use std::f64::consts::PI;

    if x.abs() < 1e-10 {
        return 1.0;
    }
    if x.abs() >= SINC_HALF_WIDTH {
        return 0.0;
    }
    let sinc = (PI * x).sin() / (PI * x);
    let phase = 2.0 * PI * (x + SINC_HALF_WIDTH) / (2.0 * SINC_HALF_WIDTH);
    let window = 0.35875 - 0.48829 * phase.cos() + 0.14128 * (2.0 * phase).cos()
        - 0.01168 * (3.0 * phase).cos();
    sinc * window
}

#[inline]
fn frame_at(data: &[StereoSample], index: i64) -> StereoSample {
    if index < 0 {
        return StereoSample::silence();
    }
    data.get(index as usize).copied().unwrap_or_default()
}

#[inline]
fn linear(a: StereoSample, b: StereoSample, t: f32) -> StereoSample {
    a * (1.0 - t) + b * t
}

/// Catmull-Rom spline through `p1`..`p2`
#[inline]
fn catmull_rom(p0: StereoSample, p1: StereoSample, p2: StereoSample, p3: StereoSample, t: f32) -> StereoSample {
    let t2 = t * t;
    let t3 = t2 * t;
    let w0 = -0.5 * t3 + t2 - 0.5 * t;
    let w1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let w2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let w3 = 0.5 * t3 - 0.5 * t2;
    p0 * w0 + p1 * w1 + p2 * w2 + p3 * w3
}

fn windowed_sinc(data: &[StereoSample], index: i64, t: f64) -> StereoSample {
    let (mut left, mut right, mut norm) = (0.0f64, 0.0f64, 0.0f64);
    for offset in -3..=4i64 {
        let weight = sinc_kernel(offset as f64 - t);
        let s = frame_at(data, index + offset);
        left += s.left as f64 * weight;
        right += s.right as f64 * weight;
        norm += weight;
    }
    if norm.abs() > 1e-10 {
        left /= norm;
        right /= norm;
    }
    StereoSample::new(left as f32, right as f32)
}

/// Read `data` at a fractional frame position
pub fn read_interpolated(data: &[StereoSample], position: f64, method: InterpolationMethod) -> StereoSample {
    let floor = position.floor();
    let index = floor as i64;
    let t = position - floor;

    match method {
        InterpolationMethod::Linear => {
            linear(frame_at(data, index), frame_at(data, index + 1), t as f32)
        }
        InterpolationMethod::Cubic => catmull_rom(
            frame_at(data, index - 1),
            frame_at(data, index),
            frame_at(data, index + 1),
            frame_at(data, index + 2),
            t as f32,
        ),
        InterpolationMethod::Sinc => windowed_sinc(data, index, t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<StereoSample> {
        (0..len).map(|i| StereoSample::new(i as f32, -(i as f32))).collect()
    }

    #[test]
    fn test_integer_positions_are_exact() {
        let data = ramp(32);
        for method in InterpolationMethod::all() {
            let s = read_interpolated(&data, 10.0, *method);
            assert!((s.left - 10.0).abs() < 1e-4, "{:?} gave {}", method, s.left);
        }
    }

    #[test]
    fn test_linear_and_cubic_follow_a_ramp() {
        let data = ramp(32);
        let lin = read_interpolated(&data, 7.25, InterpolationMethod::Linear);
        assert!((lin.left - 7.25).abs() < 1e-5);
        assert!((lin.right + 7.25).abs() < 1e-5);

        // Catmull-Rom reproduces linear data exactly
        let cub = read_interpolated(&data, 7.25, InterpolationMethod::Cubic);
        assert!((cub.left - 7.25).abs() < 1e-4);
    }

    #[test]
    fn test_sinc_is_close_on_smooth_signal() {
        let data: Vec<StereoSample> = (0..64)
            .map(|i| StereoSample::mono((i as f32 * 0.1).sin()))
            .collect();
        let s = read_interpolated(&data, 30.5, InterpolationMethod::Sinc);
        let expected = (30.5f32 * 0.1).sin();
        assert!((s.left - expected).abs() < 0.02, "got {} expected {}", s.left, expected);
    }

    #[test]
    fn test_outside_slice_reads_silence() {
        let data = ramp(4);
        assert_eq!(read_interpolated(&data, -5.0, InterpolationMethod::Linear), StereoSample::silence());
        assert_eq!(read_interpolated(&data, 10.0, InterpolationMethod::Cubic), StereoSample::silence());
    }

    #[test]
    fn test_serde_names() {
        let yaml = serde_yaml::to_string(&InterpolationMethod::Sinc).unwrap();
        assert_eq!(yaml.trim(), "sinc");
        let parsed: InterpolationMethod = serde_yaml::from_str("linear").unwrap();
        assert_eq!(parsed, InterpolationMethod::Linear);
    }
}
