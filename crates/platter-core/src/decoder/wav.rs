//! WAV backend (hound)
//!
//! PCM WAV supports exact frame seeking, so random access costs a single
//! `seek` and sequential chunk fetches never seek at all.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader};

use super::{AudioDecoder, DecodeError, DecodedFrames, OpenError, StreamInfo};
use crate::types::{Sample, StereoSample};

/// Random-access WAV decoder
pub struct WavDecoder {
    reader: WavReader<BufReader<File>>,
    info: StreamInfo,
    format: SampleFormat,
    bits_per_sample: u16,
    /// Frame the underlying reader is positioned at
    next_frame: u64,
    /// One interleaved frame of native channels
    frame_buf: Vec<Sample>,
}

impl WavDecoder {
    /// Open a WAV file and read its header
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let reader = WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                OpenError::NotFound {
                    path: path.to_path_buf(),
                }
            }
            other => OpenError::unreadable(path, other.to_string()),
        })?;

        let spec = reader.spec();
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 1..=32) | (SampleFormat::Float, 32) => {}
            (format, bits) => {
                return Err(OpenError::unreadable(
                    path,
                    format!("unsupported WAV sample format {:?} with {} bits", format, bits),
                ));
            }
        }

        let info = StreamInfo {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            total_frames: reader.duration() as u64,
        };
        if info.total_frames == 0 {
            return Err(OpenError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            reader,
            info,
            format: spec.sample_format,
            bits_per_sample: spec.bits_per_sample,
            next_frame: 0,
            frame_buf: vec![0.0; spec.channels as usize],
        })
    }

    /// Read `output.len()` frames, converting each native sample with `convert`
    fn read_frames<S: hound::Sample>(
        &mut self,
        output: &mut [StereoSample],
        convert: impl Fn(S) -> Sample,
    ) -> Result<usize, DecodeError> {
        let channels = self.frame_buf.len();
        let mut samples = self.reader.samples::<S>();

        for (written, out) in output.iter_mut().enumerate() {
            for slot in self.frame_buf.iter_mut() {
                match samples.next() {
                    Some(Ok(s)) => *slot = convert(s),
                    Some(Err(e)) => return Err(DecodeError::Io(e.to_string())),
                    None => return Ok(written),
                }
            }
            *out = StereoSample::from_frame(&self.frame_buf[..channels]);
        }
        Ok(output.len())
    }
}

impl AudioDecoder for WavDecoder {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn decode_at(
        &mut self,
        frame: u64,
        output: &mut [StereoSample],
    ) -> Result<DecodedFrames, DecodeError> {
        if frame >= self.info.total_frames {
            return Err(DecodeError::OutOfRange {
                frame,
                total_frames: self.info.total_frames,
            });
        }

        if frame != self.next_frame {
            // WavReader::seek takes a frame index (time), not a sample index
            let target = u32::try_from(frame).map_err(|_| DecodeError::Seek {
                frame,
                reason: "frame index exceeds WAV addressing".to_string(),
            })?;
            self.reader.seek(target).map_err(|e| {
                self.next_frame = u64::MAX;
                DecodeError::Seek {
                    frame,
                    reason: e.to_string(),
                }
            })?;
            self.next_frame = frame;
        }

        let remaining = (self.info.total_frames - frame) as usize;
        let wanted = output.len().min(remaining);
        let output = &mut output[..wanted];

        let result = match self.format {
            SampleFormat::Float => self.read_frames::<f32>(output, |s| s),
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (self.bits_per_sample - 1)) as Sample;
                self.read_frames::<i32>(output, move |s| s as Sample * scale)
            }
        };

        let frames = match result {
            Ok(frames) => frames,
            Err(e) => {
                // Position is unknown after a failed read; force a seek next time
                self.next_frame = u64::MAX;
                return Err(e);
            }
        };
        self.next_frame = frame + frames as u64;

        Ok(DecodedFrames {
            frames,
            end_of_stream: self.next_frame >= self.info.total_frames || frames < wanted,
        })
    }
}
