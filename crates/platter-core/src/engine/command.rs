//! Lock-free command queue from the control thread to the audio thread
//!
//! The UI pushes [`EngineCommand`]s into an `rtrb` ring buffer and the audio
//! thread drains it at the start of every callback, so deck state never
//! changes mid-buffer and neither side ever takes a lock.
//!
//! ```ignore
//! let (mut tx, mut rx) = command_channel(1024);
//!
//! // UI thread (non-blocking)
//! tx.play(0);
//!
//! // Audio thread, before rendering
//! engine.process_commands(&mut rx);
//! ```

use std::path::PathBuf;

use super::interpolate::InterpolationMethod;

/// Commands sent from the control thread to the audio thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Track Management
    // ─────────────────────────────────────────────────────────────
    /// Load a file onto a deck (opened by the deck's reader worker)
    LoadTrack { deck: usize, path: PathBuf },
    /// Unload the deck's track
    Eject { deck: usize },

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    Play { deck: usize },
    Pause { deck: usize },
    TogglePlay { deck: usize },
    /// Jump to a frame position
    Seek { deck: usize, position: f64 },
    /// Set the playback rate (1.0 nominal; negative plays backwards)
    SetRate { deck: usize, rate: f64 },
    SetReverse { deck: usize, reverse: bool },

    // ─────────────────────────────────────────────────────────────
    // Loop
    // ─────────────────────────────────────────────────────────────
    /// Set loop markers (frames) and enable or disable the loop
    SetLoop {
        deck: usize,
        loop_in: u64,
        loop_out: u64,
        enabled: bool,
    },

    // ─────────────────────────────────────────────────────────────
    // Scratch
    // ─────────────────────────────────────────────────────────────
    ScratchStart { deck: usize },
    /// Platter moved to `position` (frames)
    ScratchMove { deck: usize, position: f64 },
    ScratchEnd { deck: usize },

    // ─────────────────────────────────────────────────────────────
    // Sound
    // ─────────────────────────────────────────────────────────────
    SetKeylock { deck: usize, enabled: bool },
    SetInterpolation {
        deck: usize,
        method: InterpolationMethod,
    },
}

impl EngineCommand {
    /// Target deck index
    pub fn deck(&self) -> usize {
        match *self {
            EngineCommand::LoadTrack { deck, .. }
            | EngineCommand::Eject { deck }
            | EngineCommand::Play { deck }
            | EngineCommand::Pause { deck }
            | EngineCommand::TogglePlay { deck }
            | EngineCommand::Seek { deck, .. }
            | EngineCommand::SetRate { deck, .. }
            | EngineCommand::SetReverse { deck, .. }
            | EngineCommand::SetLoop { deck, .. }
            | EngineCommand::ScratchStart { deck }
            | EngineCommand::ScratchMove { deck, .. }
            | EngineCommand::ScratchEnd { deck }
            | EngineCommand::SetKeylock { deck, .. }
            | EngineCommand::SetInterpolation { deck, .. } => deck,
        }
    }
}

/// Control-thread end of the command queue
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    /// Queue a command (non-blocking)
    ///
    /// Returns the command back if the queue is full.
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Check if the queue has space for more commands
    pub fn has_space(&self) -> bool {
        self.producer.slots() > 0
    }

    fn send_logged(&mut self, cmd: EngineCommand) -> bool {
        match self.send(cmd) {
            Ok(()) => true,
            Err(cmd) => {
                log::warn!("Command queue full, dropped {:?}", cmd);
                false
            }
        }
    }

    pub fn load(&mut self, deck: usize, path: impl Into<PathBuf>) -> bool {
        self.send_logged(EngineCommand::LoadTrack {
            deck,
            path: path.into(),
        })
    }

    pub fn eject(&mut self, deck: usize) -> bool {
        self.send_logged(EngineCommand::Eject { deck })
    }

    pub fn play(&mut self, deck: usize) -> bool {
        self.send_logged(EngineCommand::Play { deck })
    }

    pub fn pause(&mut self, deck: usize) -> bool {
        self.send_logged(EngineCommand::Pause { deck })
    }

    pub fn toggle_play(&mut self, deck: usize) -> bool {
        self.send_logged(EngineCommand::TogglePlay { deck })
    }

    pub fn seek(&mut self, deck: usize, position: f64) -> bool {
        self.send_logged(EngineCommand::Seek { deck, position })
    }

    pub fn set_rate(&mut self, deck: usize, rate: f64) -> bool {
        self.send_logged(EngineCommand::SetRate { deck, rate })
    }

    pub fn set_loop(&mut self, deck: usize, loop_in: u64, loop_out: u64, enabled: bool) -> bool {
        self.send_logged(EngineCommand::SetLoop {
            deck,
            loop_in,
            loop_out,
            enabled,
        })
    }

    pub fn set_reverse(&mut self, deck: usize, reverse: bool) -> bool {
        self.send_logged(EngineCommand::SetReverse { deck, reverse })
    }

    pub fn set_keylock(&mut self, deck: usize, enabled: bool) -> bool {
        self.send_logged(EngineCommand::SetKeylock { deck, enabled })
    }

    pub fn set_interpolation(&mut self, deck: usize, method: InterpolationMethod) -> bool {
        self.send_logged(EngineCommand::SetInterpolation { deck, method })
    }

    pub fn scratch_start(&mut self, deck: usize) -> bool {
        self.send_logged(EngineCommand::ScratchStart { deck })
    }

    pub fn scratch_move(&mut self, deck: usize, position: f64) -> bool {
        self.send_logged(EngineCommand::ScratchMove { deck, position })
    }

    pub fn scratch_end(&mut self, deck: usize) -> bool {
        self.send_logged(EngineCommand::ScratchEnd { deck })
    }
}

/// Create a command channel with room for `capacity` queued commands
pub fn command_channel(capacity: usize) -> (CommandSender, rtrb::Consumer<EngineCommand>) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    (CommandSender { producer }, consumer)
}
