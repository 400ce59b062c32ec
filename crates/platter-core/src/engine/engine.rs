//! Main audio engine - owns the decks and mixes them to the master output

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use super::{EngineBuffer, EngineBufferAtomics, EngineCommand};
use crate::config::{ConfigError, EngineConfig};
use crate::decoder::{DefaultOpener, SourceOpener};
use crate::reader::ReaderEvent;
use crate::types::{DeckId, StereoBuffer};

/// The main audio engine
///
/// Holds one [`EngineBuffer`] per deck (each with its own caching reader and
/// worker thread). Control happens through [`EngineCommand`]s drained at the
/// start of each callback; reader events from every deck are merged into a
/// single channel for the UI.
pub struct AudioEngine {
    config: EngineConfig,
    decks: Vec<EngineBuffer>,
    /// Pre-allocated per-deck output buffers
    deck_buffers: Vec<StereoBuffer>,
    events_rx: Receiver<ReaderEvent>,
}

impl AudioEngine {
    /// Create an engine that opens tracks with the default decoders
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_opener(config, Arc::new(DefaultOpener))
    }

    /// Create an engine with a custom decoder selection
    pub fn with_opener(config: EngineConfig, opener: Arc<dyn SourceOpener>) -> Result<Self, ConfigError> {
        config.validate()?;

        let (events_tx, events_rx): (Sender<ReaderEvent>, _) = crossbeam::channel::unbounded();
        let decks = (0..config.num_decks)
            .map(|i| EngineBuffer::new(DeckId::new(i), &config, Arc::clone(&opener), events_tx.clone()))
            .collect();
        let deck_buffers = (0..config.num_decks)
            .map(|_| StereoBuffer::silence(config.max_buffer_size))
            .collect();

        log::info!(
            "Audio engine started: {} decks at {} Hz, {} frame chunks x {} per deck",
            config.num_decks,
            config.sample_rate,
            config.reader.chunk_frames,
            config.reader.cache_chunks
        );

        Ok(Self {
            config,
            decks,
            deck_buffers,
            events_rx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn num_decks(&self) -> usize {
        self.decks.len()
    }

    /// Reader events (loaded / failed / unloaded) from every deck
    pub fn events(&self) -> Receiver<ReaderEvent> {
        self.events_rx.clone()
    }

    pub fn deck(&self, id: usize) -> Option<&EngineBuffer> {
        self.decks.get(id)
    }

    pub fn deck_mut(&mut self, id: usize) -> Option<&mut EngineBuffer> {
        self.decks.get_mut(id)
    }

    /// Lock-free snapshot handles for every deck
    pub fn deck_atomics(&self) -> Vec<Arc<EngineBufferAtomics>> {
        self.decks.iter().map(EngineBuffer::atomics).collect()
    }

    /// Output of `deck` from the most recent callback
    pub fn deck_output(&self, id: usize) -> Option<&StereoBuffer> {
        self.deck_buffers.get(id)
    }

    /// Apply every queued command
    pub fn process_commands(&mut self, commands: &mut rtrb::Consumer<EngineCommand>) {
        while let Ok(cmd) = commands.pop() {
            self.apply(cmd);
        }
    }

    /// Apply one command to its deck
    pub fn apply(&mut self, cmd: EngineCommand) {
        let Some(deck) = self.decks.get_mut(cmd.deck()) else {
            log::warn!("Ignoring command for unknown deck {}: {:?}", cmd.deck(), cmd);
            return;
        };

        match cmd {
            EngineCommand::LoadTrack { path, .. } => {
                deck.load_track(path);
            }
            EngineCommand::Eject { .. } => deck.eject(),
            EngineCommand::Play { .. } => deck.play(),
            EngineCommand::Pause { .. } => deck.pause(),
            EngineCommand::TogglePlay { .. } => deck.toggle_play(),
            EngineCommand::Seek { position, .. } => deck.seek(position),
            EngineCommand::SetRate { rate, .. } => deck.set_rate(rate),
            EngineCommand::SetReverse { reverse, .. } => deck.set_reverse(reverse),
            EngineCommand::SetLoop {
                loop_in,
                loop_out,
                enabled,
                ..
            } => deck.set_loop(loop_in, loop_out, enabled),
            EngineCommand::ScratchStart { .. } => deck.scratch_start(),
            EngineCommand::ScratchMove { position, .. } => deck.scratch_move(position),
            EngineCommand::ScratchEnd { .. } => deck.scratch_end(),
            EngineCommand::SetKeylock { enabled, .. } => deck.set_keylock(enabled),
            EngineCommand::SetInterpolation { method, .. } => deck.set_interpolation(method),
        }
    }

    /// Render every deck and sum them into `master`
    ///
    /// Buffers longer than `max_buffer_size` are rendered in pieces.
    pub fn process(&mut self, master: &mut StereoBuffer) {
        let total = master.len();
        let out = master.as_mut_slice();
        out.fill(Default::default());

        let mut offset = 0;
        while offset < total {
            let n = (total - offset).min(self.config.max_buffer_size);
            let dst = &mut out[offset..offset + n];
            for (deck, buffer) in self.decks.iter_mut().zip(self.deck_buffers.iter_mut()) {
                buffer.set_len_from_capacity(n);
                deck.process(buffer);
                for (d, s) in dst.iter_mut().zip(buffer.iter()) {
                    *d += *s;
                }
            }
            offset += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::config::ReaderConfig;
    use crate::decoder::testing::{wait_until, RampDecoder, ScriptedOpener};
    use crate::engine::{command_channel, PlayState};
    use crate::reader::TrackState;
    use crate::types::StereoSample;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn small_config(num_decks: usize) -> EngineConfig {
        EngineConfig {
            num_decks,
            max_buffer_size: 512,
            reader: ReaderConfig {
                chunk_frames: 4096,
                cache_chunks: 16,
                ..ReaderConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn ramp_engine(num_decks: usize) -> AudioEngine {
        let opener = ScriptedOpener::new();
        opener.add("ramp", RampDecoder::new(200_000));
        AudioEngine::with_opener(small_config(num_decks), opener).unwrap()
    }

    /// Load the ramp on `deck` and wait until its first chunk is cached
    fn load_ramp(engine: &mut AudioEngine, deck: usize) {
        engine.apply(EngineCommand::LoadTrack {
            deck,
            path: PathBuf::from("ramp"),
        });
        let buffer = engine.deck_mut(deck).unwrap();
        let mut probe = vec![StereoSample::silence(); 4096];
        assert!(wait_until(TIMEOUT, || {
            let reader = buffer.reader_mut();
            reader.poll_status();
            matches!(reader.track_state(), TrackState::Loaded(_)) && reader.read(0, &mut probe).frames_missed == 0
        }));
    }

    #[test]
    fn test_engine_creation() {
        let engine = AudioEngine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.num_decks(), 4);
        assert_eq!(engine.deck_atomics().len(), 4);
        assert!(engine.deck(4).is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_rate: 0.5,
            ..EngineConfig::default()
        };
        assert!(matches!(AudioEngine::new(config), Err(ConfigError::MaxRate(_))));
    }

    #[test]
    fn test_process_empty_engine() {
        let mut engine = AudioEngine::new(small_config(2)).unwrap();
        let mut master = StereoBuffer::silence(256);

        // Should not panic with no tracks loaded
        engine.process(&mut master);

        assert_eq!(master.len(), 256);
        assert_eq!(master.peak(), 0.0);
    }

    #[test]
    fn test_commands_drive_deck() {
        let mut engine = ramp_engine(1);
        load_ramp(&mut engine, 0);

        let (mut tx, mut rx) = command_channel(16);
        tx.seek(0, 100.0);
        tx.play(0);
        engine.process_commands(&mut rx);

        let mut master = StereoBuffer::silence(128);
        engine.process(&mut master);
        assert_eq!(master[0], RampDecoder::frame_value(100));
        assert_eq!(master[127], RampDecoder::frame_value(227));

        let atomics = engine.deck_atomics();
        assert_eq!(atomics[0].play_state(), PlayState::Playing);
        assert_eq!(atomics[0].position(), 228);
        assert_eq!(atomics[0].track_frames(), 200_000);
    }

    #[test]
    fn test_decks_are_summed() {
        let mut engine = ramp_engine(2);
        load_ramp(&mut engine, 0);
        load_ramp(&mut engine, 1);
        engine.apply(EngineCommand::Play { deck: 0 });
        engine.apply(EngineCommand::Play { deck: 1 });

        let mut master = StereoBuffer::silence(64);
        engine.process(&mut master);
        for i in 0..64 {
            let one = RampDecoder::frame_value(i as u64);
            assert_eq!(master[i], one + one);
            assert_eq!(engine.deck_output(1).unwrap()[i], one);
        }
    }

    #[test]
    fn test_oversized_buffer_is_split() {
        let mut engine = ramp_engine(1);
        load_ramp(&mut engine, 0);
        engine.apply(EngineCommand::Play { deck: 0 });

        let mut master = StereoBuffer::silence(1500);
        engine.process(&mut master);
        assert_eq!(master[0], RampDecoder::frame_value(0));
        assert_eq!(master[1499], RampDecoder::frame_value(1499));
        assert_eq!(engine.deck(0).unwrap().position(), 1500.0);
    }

    #[test]
    fn test_unknown_deck_command_ignored() {
        let mut engine = ramp_engine(1);
        engine.apply(EngineCommand::Play { deck: 7 });
        assert_eq!(engine.deck(0).unwrap().play_state(), PlayState::Stopped);
    }

    #[test]
    fn test_events_from_all_decks() {
        let mut engine = ramp_engine(2);
        let events = engine.events();
        engine.apply(EngineCommand::LoadTrack {
            deck: 1,
            path: PathBuf::from("ramp"),
        });

        let event = events.recv_timeout(TIMEOUT).unwrap();
        assert!(matches!(event, ReaderEvent::TrackLoaded { deck, .. } if deck == DeckId(1)));
    }
}
