//! Compressed-format backend (symphonia)
//!
//! Handles every container/codec symphonia is built with. Seeks are
//! frame-accurate: the format reader seeks to the nearest preceding packet and
//! the decoded frames before the target are skipped. Sequential fetches reuse
//! the decoder position and never seek. A packet that starts past the wanted
//! frame leaves a gap, which is output as silence so frames stay aligned.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{AudioDecoder, DecodeError, DecodedFrames, OpenError, StreamInfo};
use crate::types::StereoSample;

/// Random-access decoder over a symphonia format reader
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: StreamInfo,
    /// Interleaved samples of the last decoded packet
    pending: Vec<f32>,
    /// Channel count of `pending`
    pending_channels: usize,
    /// Timestamp (frame) of the first frame in `pending`
    pending_ts: u64,
    /// Frames of `pending` already consumed
    pending_offset: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: usize,
}

fn is_end_of_stream(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

impl SymphoniaDecoder {
    /// Probe a file and prepare its first audio track for decoding
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OpenError::NotFound {
                path: path.to_path_buf(),
            },
            _ => OpenError::unreadable(path, e.to_string()),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| OpenError::unreadable(path, e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| OpenError::unreadable(path, "no audio track found"))?;

        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| OpenError::unreadable(path, "unknown sample rate"))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| OpenError::unreadable(path, e.to_string()))?;

        let total_frames = match params.n_frames {
            Some(n) => n,
            None => {
                log::debug!("{:?} has no frame count in its header, scanning packets", path);
                count_frames(format.as_mut(), track_id)
                    .map_err(|e| OpenError::unreadable(path, e.to_string()))?
            }
        };

        if total_frames == 0 {
            return Err(OpenError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            format,
            decoder,
            track_id,
            info: StreamInfo {
                sample_rate,
                channels,
                total_frames,
            },
            pending: Vec::new(),
            pending_channels: channels as usize,
            pending_ts: 0,
            pending_offset: 0,
            sample_buf: None,
            sample_buf_frames: 0,
        })
    }

    fn pending_frames(&self) -> usize {
        if self.pending_channels == 0 {
            return 0;
        }
        self.pending.len() / self.pending_channels
    }

    /// Frame the next consumed sample belongs to
    fn position(&self) -> u64 {
        self.pending_ts + self.pending_offset as u64
    }

    fn seek_to(&mut self, frame: u64) -> Result<(), DecodeError> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| DecodeError::Seek {
                frame,
                reason: e.to_string(),
            })?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_offset = 0;
        self.pending_ts = seeked.actual_ts;
        Ok(())
    }

    /// Decode the next packet of our track into `pending`
    ///
    /// Returns `false` at the end of the stream.
    fn decode_next_packet(&mut self) -> Result<bool, DecodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(e) if is_end_of_stream(&e) => return Ok(false),
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .decoder
                .decode(&packet)
                .map_err(|e| DecodeError::Codec(e.to_string()))?;

            let spec = *decoded.spec();
            let capacity = decoded.capacity();
            if self.sample_buf.is_none() || capacity > self.sample_buf_frames {
                self.sample_buf = Some(SampleBuffer::new(capacity as u64, spec));
                self.sample_buf_frames = capacity;
            }

            self.pending.clear();
            if let Some(ref mut buf) = self.sample_buf {
                buf.copy_interleaved_ref(decoded);
                self.pending.extend_from_slice(buf.samples());
            }
            self.pending_channels = spec.channels.count();
            self.pending_ts = packet.ts();
            self.pending_offset = 0;
            return Ok(true);
        }
    }
}

/// How the pending packet lines up with the next wanted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    /// Drop pending frames that precede the target (after a coarse seek)
    Skip(usize),
    /// The packet starts past the target; output silence up to it
    Gap(usize),
    /// Pending frames start at the target
    Copy(usize),
}

fn align(position: u64, want_ts: u64, available: usize, remaining: usize) -> Align {
    if position < want_ts {
        Align::Skip(((want_ts - position) as usize).min(available))
    } else if position > want_ts {
        Align::Gap(((position - want_ts) as usize).min(remaining))
    } else {
        Align::Copy(available.min(remaining))
    }
}

/// Count the frames of a track by walking its packets, then rewind
fn count_frames(format: &mut dyn FormatReader, track_id: u32) -> Result<u64, SymphoniaError> {
    let mut total = 0u64;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => total += packet.dur(),
            Ok(_) => {}
            Err(e) if is_end_of_stream(&e) => break,
            Err(e) => return Err(e),
        }
    }

    if total > 0 {
        format.seek(SeekMode::Accurate, SeekTo::TimeStamp { ts: 0, track_id })?;
    }
    Ok(total)
}

impl AudioDecoder for SymphoniaDecoder {
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

        let wanted = output.len().min((self.info.total_frames - frame) as usize);

        // Sequential fetches continue from the current packet
        if self.position() != frame {
            self.seek_to(frame)?;
        }

        let mut filled = 0;
        let mut ended = false;
        while filled < wanted {
            let want_ts = frame + filled as u64;
            let available = self.pending_frames().saturating_sub(self.pending_offset);

            if available == 0 {
                if !self.decode_next_packet()? {
                    ended = true;
                    break;
                }
                continue;
            }

            match align(self.position(), want_ts, available, wanted - filled) {
                Align::Skip(n) => self.pending_offset += n,
                Align::Gap(n) => {
                    log::debug!("timestamp gap of {} frames at frame {}", n, want_ts);
                    output[filled..filled + n].fill(StereoSample::silence());
                    filled += n;
                }
                Align::Copy(n) => {
                    let ch = self.pending_channels;
                    for i in 0..n {
                        let base = (self.pending_offset + i) * ch;
                        output[filled + i] = StereoSample::from_frame(&self.pending[base..base + ch]);
                    }
                    self.pending_offset += n;
                    filled += n;
                }
            }
        }

        Ok(DecodedFrames {
            frames: filled,
            end_of_stream: ended || frame + filled as u64 >= self.info.total_frames,
        })
    }
}
