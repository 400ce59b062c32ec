//! Background decode worker (one per deck)
//!
//! The worker owns the deck's [`TrackSource`] and is the only place that
//! blocks on file or codec I/O. It consumes requests from the reader's SPSC
//! queue, decodes chunks and publishes them into the chunk store, and reports
//! track status back to the reader (SPSC) and to the UI (event channel).
//!
//! Fetches are served urgent-first: chunks the audio thread just missed go
//! ahead of queued look-ahead requests, and a look-ahead request the reader
//! escalated is decoded once. Requests for a replaced track are released
//! without decoding.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;

use super::chunk::{ChunkKey, SlotId};
use super::event::{LoadFailure, ReaderEvent};
use super::health::ReaderHealth;
use super::store::{ChunkPublisher, ChunkResult, PublishOutcome};
use crate::decoder::{SourceOpener, StreamInfo, TrackSource};
use crate::types::{DeckId, StereoSample, TrackGeneration};

/// Idle wait between request polls; the reader unparks the worker on push
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Fetch priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Needed by the audio thread now (a miss at the play position)
    Urgent,
    /// Read-ahead
    Lookahead,
}

/// A reserved chunk waiting to be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: ChunkKey,
    pub slot: SlotId,
    pub priority: Priority,
}

/// Reader → worker requests
#[derive(Debug)]
pub enum WorkerRequest {
    /// Open `path` for `generation`, then decode `first_chunk` right away
    Load {
        generation: TrackGeneration,
        path: PathBuf,
        first_chunk: Option<FetchRequest>,
    },
    /// Drop the current source
    Eject { generation: TrackGeneration },
    Fetch(FetchRequest),
}

/// Worker → reader status updates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReaderStatus {
    TrackLoaded {
        generation: TrackGeneration,
        info: StreamInfo,
    },
    LoadFailed { generation: TrackGeneration },
    TrackUnloaded { generation: TrackGeneration },
}

/// Channels and shared state handed to the worker thread
pub(crate) struct WorkerContext {
    pub deck: DeckId,
    pub requests: rtrb::Consumer<WorkerRequest>,
    pub status: rtrb::Producer<ReaderStatus>,
    pub events: Sender<ReaderEvent>,
    pub publisher: ChunkPublisher,
    pub opener: Arc<dyn SourceOpener>,
    pub health: Arc<ReaderHealth>,
    pub shutdown: Arc<AtomicBool>,
}

pub(crate) struct ReaderWorker {
    ctx: WorkerContext,
    source: Option<TrackSource>,
    generation: TrackGeneration,
    /// A failure event was already raised for `generation`
    failure_reported: bool,
    urgent: VecDeque<FetchRequest>,
    lookahead: VecDeque<FetchRequest>,
    decode_buf: Vec<StereoSample>,
}

impl ReaderWorker {
    pub(crate) fn new(ctx: WorkerContext) -> Self {
        let chunk_frames = ctx.publisher.chunk_frames();
        Self {
            ctx,
            source: None,
            generation: TrackGeneration::NONE,
            failure_reported: false,
            urgent: VecDeque::new(),
            lookahead: VecDeque::new(),
            decode_buf: vec![StereoSample::silence(); chunk_frames],
        }
    }

    /// Thread body: runs until the owning reader shuts it down
    pub(crate) fn run(mut self) {
        log::debug!("{} reader worker started", self.ctx.deck);

        while !self.ctx.shutdown.load(Ordering::Acquire) {
            self.drain_requests();

            match self.next_fetch() {
                Some(request) => self.fetch(request),
                None => std::thread::park_timeout(IDLE_PARK),
            }
        }

        log::debug!("{} reader worker shutting down", self.ctx.deck);
    }

    fn drain_requests(&mut self) {
        while let Ok(request) = self.ctx.requests.pop() {
            match request {
                WorkerRequest::Load {
                    generation,
                    path,
                    first_chunk,
                } => self.load(generation, path, first_chunk),
                WorkerRequest::Eject { generation } => self.eject(generation),
                WorkerRequest::Fetch(fetch) => match fetch.priority {
                    Priority::Urgent => self.urgent.push_back(fetch),
                    Priority::Lookahead => self.lookahead.push_back(fetch),
                },
            }
        }
    }

    fn next_fetch(&mut self) -> Option<FetchRequest> {
        self.urgent.pop_front().or_else(|| self.lookahead.pop_front())
    }

    /// Release every queued fetch that no longer belongs to the current track
    fn purge_stale(&mut self) {
        let publisher = &self.ctx.publisher;
        let health = &self.ctx.health;
        let generation = self.generation;
        for queue in [&mut self.urgent, &mut self.lookahead] {
            queue.retain(|fetch| {
                if fetch.key.generation == generation && publisher.is_current(generation) {
                    return true;
                }
                publisher.discard(fetch.slot, fetch.key);
                health.record_stale();
                false
            });
        }
    }

    fn load(&mut self, generation: TrackGeneration, path: PathBuf, first_chunk: Option<FetchRequest>) {
        self.generation = generation;
        self.failure_reported = false;
        self.source = None;
        self.purge_stale();

        if !self.ctx.publisher.is_current(generation) {
            // Superseded by a later load still in the queue
            log::debug!("{} skipping superseded load of {:?}", self.ctx.deck, path);
            if let Some(fetch) = first_chunk {
                self.discard(fetch);
            }
            return;
        }

        log::info!("{} loading {:?} ({})", self.ctx.deck, path, generation);
        match self.ctx.opener.open(&path) {
            Ok(source) => {
                let info = source.info();
                log::info!(
                    "{} loaded {:?}: {:.1}s, {} Hz, {} ch",
                    self.ctx.deck,
                    path,
                    info.duration_seconds(),
                    info.sample_rate,
                    info.channels
                );
                self.source = Some(source);
                self.send_status(ReaderStatus::TrackLoaded { generation, info });
                self.send_event(ReaderEvent::TrackLoaded {
                    deck: self.ctx.deck,
                    generation,
                    path,
                    info,
                });
                if let Some(fetch) = first_chunk {
                    self.fetch(fetch);
                }
            }
            Err(err) => {
                log::warn!("{} failed to open track: {}", self.ctx.deck, err);
                self.send_status(ReaderStatus::LoadFailed { generation });
                self.report_failure(LoadFailure::from(&err));
                if let Some(fetch) = first_chunk {
                    self.ctx.publisher.publish(fetch.slot, fetch.key, ChunkResult::Failed);
                }
            }
        }
    }

    fn eject(&mut self, generation: TrackGeneration) {
        self.generation = generation;
        self.failure_reported = false;
        if let Some(source) = self.source.take() {
            log::info!("{} ejected {:?}", self.ctx.deck, source.path());
        }
        self.purge_stale();
        self.send_status(ReaderStatus::TrackUnloaded { generation });
        self.send_event(ReaderEvent::TrackUnloaded {
            deck: self.ctx.deck,
            generation,
        });
    }

    fn discard(&mut self, fetch: FetchRequest) {
        self.ctx.publisher.discard(fetch.slot, fetch.key);
        self.ctx.health.record_stale();
    }

    fn fetch(&mut self, fetch: FetchRequest) {
        if fetch.key.generation != self.generation || !self.ctx.publisher.is_current(fetch.key.generation) {
            self.discard(fetch);
            return;
        }
        if !self.ctx.publisher.is_pending(fetch.slot, fetch.key) {
            // Duplicate of an escalated fetch that was already served
            return;
        }

        let Some(source) = self.source.as_mut() else {
            // Open failed for this generation; the failure is already reported
            self.ctx.publisher.publish(fetch.slot, fetch.key, ChunkResult::Failed);
            return;
        };

        let chunk_frames = self.ctx.publisher.chunk_frames();
        let start = fetch.key.first_frame(chunk_frames);
        let result = source.decode_at(start, &mut self.decode_buf[..chunk_frames]);

        let outcome = match result {
            Ok(decoded) if decoded.frames > 0 => {
                let data = &self.decode_buf[..decoded.frames];
                self.ctx.publisher.publish(fetch.slot, fetch.key, ChunkResult::Data(data))
            }
            Ok(_) => {
                log::warn!("{} decoded no frames for {}", self.ctx.deck, fetch.key);
                self.ctx.publisher.publish(fetch.slot, fetch.key, ChunkResult::Failed)
            }
            Err(err) => {
                log::warn!("{} failed to decode {}: {}", self.ctx.deck, fetch.key, err);
                self.ctx.publisher.publish(fetch.slot, fetch.key, ChunkResult::Failed)
            }
        };

        match outcome {
            PublishOutcome::Ready => self.ctx.health.record_decoded(),
            PublishOutcome::Invalid => {
                self.ctx.health.record_failed();
                let path = self.source.as_ref().map(|s| s.path().to_path_buf()).unwrap_or_default();
                self.report_failure(LoadFailure::LoadFailed(path));
            }
            PublishOutcome::Discarded => self.ctx.health.record_stale(),
        }
    }

    fn report_failure(&mut self, failure: LoadFailure) {
        if self.failure_reported {
            return;
        }
        self.failure_reported = true;
        log::error!("{}: {}", self.ctx.deck, failure);
        self.send_event(ReaderEvent::LoadFailed {
            deck: self.ctx.deck,
            generation: self.generation,
            failure,
        });
    }

    fn send_status(&mut self, status: ReaderStatus) {
        if self.ctx.status.push(status).is_err() {
            log::warn!("{} status queue full, dropped {:?}", self.ctx.deck, status);
        }
    }

    fn send_event(&self, event: ReaderEvent) {
        // The UI may have gone away; events are advisory
        let _ = self.ctx.events.send(event);
    }
}
