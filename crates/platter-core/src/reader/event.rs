//! Reader events for the UI error-reporting layer

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::decoder::{OpenError, StreamInfo};
use crate::types::{DeckId, TrackGeneration};

/// User-facing load failure, one per failed track load
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadFailure {
    #[error("The file '{}' could not be found.", .0.display())]
    FileNotFound(PathBuf),

    #[error("The file '{}' could not be loaded.", .0.display())]
    LoadFailed(PathBuf),

    #[error("The file '{}' is empty and could not be loaded.", .0.display())]
    EmptyFile(PathBuf),
}

impl LoadFailure {
    pub fn path(&self) -> &Path {
        match self {
            LoadFailure::FileNotFound(path)
            | LoadFailure::LoadFailed(path)
            | LoadFailure::EmptyFile(path) => path,
        }
    }
}

impl From<&OpenError> for LoadFailure {
    fn from(err: &OpenError) -> Self {
        let path = err.path().to_path_buf();
        match err {
            OpenError::NotFound { .. } => LoadFailure::FileNotFound(path),
            OpenError::Unreadable { .. } => LoadFailure::LoadFailed(path),
            OpenError::Empty { .. } => LoadFailure::EmptyFile(path),
        }
    }
}

/// Status event emitted by a deck's reader worker
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// The track opened successfully
    TrackLoaded {
        deck: DeckId,
        generation: TrackGeneration,
        path: PathBuf,
        info: StreamInfo,
    },
    /// Opening or decoding failed (raised at most once per load)
    LoadFailed {
        deck: DeckId,
        generation: TrackGeneration,
        failure: LoadFailure,
    },
    /// The deck was ejected
    TrackUnloaded {
        deck: DeckId,
        generation: TrackGeneration,
    },
}

impl ReaderEvent {
    pub fn deck(&self) -> DeckId {
        match self {
            ReaderEvent::TrackLoaded { deck, .. }
            | ReaderEvent::LoadFailed { deck, .. }
            | ReaderEvent::TrackUnloaded { deck, .. } => *deck,
        }
    }

    pub fn generation(&self) -> TrackGeneration {
        match self {
            ReaderEvent::TrackLoaded { generation, .. }
            | ReaderEvent::LoadFailed { generation, .. }
            | ReaderEvent::TrackUnloaded { generation, .. } => *generation,
        }
    }
}
