//! Decoder adapters
//!
//! Uniform "decode N frames at position P" access to format-specific codecs.
//! Every backend implements [`AudioDecoder`]; a [`TrackSource`] couples one
//! opened decoder with its stream info and enforces the range contract, and a
//! [`SourceOpener`] picks the backend for a path:
//!
//! - `.wav` / `.wave`: [`WavDecoder`] (hound, exact frame seeking)
//! - everything else: [`SymphoniaDecoder`] (FLAC, MP3, Ogg Vorbis, ...)
//!
//! Decoders always produce stereo frames; mono is duplicated and wider layouts
//! keep their front pair. Decoders are only ever driven from a reader worker
//! thread, never from the audio thread.

mod compressed;
mod wav;

#[cfg(test)]
pub(crate) mod testing;

pub use self::compressed::SymphoniaDecoder;
pub use self::wav::WavDecoder;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::StereoSample;

/// Errors raised while opening a track
///
/// The three variants map one-to-one onto the user-visible load failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpenError {
    /// The path does not exist or is not a file
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    /// The file exists but is corrupt, unsupported or unreadable
    #[error("cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    /// The stream decodes to zero frames
    #[error("no decodable frames in {path}")]
    Empty { path: PathBuf },
}

impl OpenError {
    /// Path of the file that failed to open
    pub fn path(&self) -> &Path {
        match self {
            OpenError::NotFound { path }
            | OpenError::Unreadable { path, .. }
            | OpenError::Empty { path } => path,
        }
    }

    pub(crate) fn unreadable(path: &Path, reason: impl Into<String>) -> Self {
        OpenError::Unreadable {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a decoder after a successful open
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Requested start frame lies at or beyond the end of the stream
    #[error("frame {frame} is outside the stream ({total_frames} frames)")]
    OutOfRange { frame: u64, total_frames: u64 },

    /// Seeking to a frame failed
    #[error("seek to frame {frame} failed: {reason}")]
    Seek { frame: u64, reason: String },

    /// The codec or the container reported an error
    #[error("codec error: {0}")]
    Codec(String),

    /// The stream ended before its announced length
    #[error("stream ended at frame {frame}, expected {expected} frames")]
    UnexpectedEnd { frame: u64, expected: u64 },

    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(String),
}

/// Properties of an opened stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Native sample rate of the file (Hz)
    pub sample_rate: u32,
    /// Native channel count of the file
    pub channels: u16,
    /// Total number of decodable frames
    pub total_frames: u64,
}

impl StreamInfo {
    /// Duration in seconds at the native sample rate
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.total_frames as f64 / self.sample_rate as f64
    }
}

/// Result of one `decode_at` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrames {
    /// Number of frames written to the front of the output slice
    pub frames: usize,
    /// The stream ended inside (or exactly at the end of) this range
    pub end_of_stream: bool,
}

/// Format-specific decoder behind a uniform random-access contract
///
/// `decode_at` seeks if necessary and fills `output` from `frame` onwards.
/// It writes exactly `output.len()` frames unless the stream ends first, in
/// which case it returns fewer and sets `end_of_stream`; it never returns a
/// short count silently.
pub trait AudioDecoder: Send {
    /// Stream properties, fixed at open time
    fn info(&self) -> StreamInfo;

    /// Decode frames starting at `frame` into `output`
    fn decode_at(
        &mut self,
        frame: u64,
        output: &mut [StereoSample],
    ) -> Result<DecodedFrames, DecodeError>;
}

/// An opened, seekable audio stream
///
/// Owned exclusively by one reader worker for the lifetime of a loaded track.
pub struct TrackSource {
    path: PathBuf,
    info: StreamInfo,
    decoder: Box<dyn AudioDecoder>,
}

impl std::fmt::Debug for TrackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackSource")
            .field("path", &self.path)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl TrackSource {
    /// Open a file with the default backend selection
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        DefaultOpener.open(path)
    }

    /// Wrap an already opened decoder
    pub fn new(path: impl Into<PathBuf>, decoder: Box<dyn AudioDecoder>) -> Result<Self, OpenError> {
        let path = path.into();
        let info = decoder.info();
        if info.total_frames == 0 {
            return Err(OpenError::Empty { path });
        }
        if info.sample_rate == 0 || info.channels == 0 {
            return Err(OpenError::Unreadable {
                path,
                reason: format!(
                    "invalid stream layout ({} Hz, {} channels)",
                    info.sample_rate, info.channels
                ),
            });
        }
        Ok(Self { path, info, decoder })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    /// Decode `output.len()` frames at `frame`, clamped to the stream end
    ///
    /// Frames beyond the end of the stream are never requested from the
    /// decoder. A decoder returning fewer frames than available without
    /// flagging the end is reported as [`DecodeError::UnexpectedEnd`].
    pub fn decode_at(
        &mut self,
        frame: u64,
        output: &mut [StereoSample],
    ) -> Result<DecodedFrames, DecodeError> {
        let total = self.info.total_frames;
        if frame >= total {
            return Err(DecodeError::OutOfRange {
                frame,
                total_frames: total,
            });
        }

        let available = (total - frame).min(output.len() as u64) as usize;
        let decoded = self.decoder.decode_at(frame, &mut output[..available])?;

        if decoded.frames < available && !decoded.end_of_stream {
            return Err(DecodeError::UnexpectedEnd {
                frame: frame + decoded.frames as u64,
                expected: total,
            });
        }

        Ok(DecodedFrames {
            frames: decoded.frames,
            end_of_stream: decoded.end_of_stream || frame + decoded.frames as u64 >= total,
        })
    }
}

/// Opens track sources for a reader worker
///
/// The seam through which the worker obtains decoders; the default picks a
/// backend by file extension.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<TrackSource, OpenError>;
}

/// Extension-based backend selection
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOpener;

impl DefaultOpener {
    fn is_wav(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
            .unwrap_or(false)
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, path: &Path) -> Result<TrackSource, OpenError> {
        if !path.is_file() {
            return Err(OpenError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let decoder: Box<dyn AudioDecoder> = if Self::is_wav(path) {
            Box::new(WavDecoder::open(path)?)
        } else {
            Box::new(SymphoniaDecoder::open(path)?)
        };

        let source = TrackSource::new(path, decoder)?;
        log::debug!(
            "Opened {:?}: {} frames, {} Hz, {} ch",
            path,
            source.info.total_frames,
            source.info.sample_rate,
            source.info.channels
        );
        Ok(source)
    }
}
