//! Vinyl scratch emulation
//!
//! While scratching, the UI drives a target position (the "platter" under the
//! hand) and the deck follows it. The followed position is smoothed with an
//! exponential moving average so irregular UI updates still produce a
//! continuous playback speed. The deck plays from the previous smoothed
//! position to the new one in each callback, so position never jumps; when the
//! smoothed speed is below a small threshold the output is silence, like a
//! record held still.

/// Below this speed (ratio of nominal) the record is considered held
const VELOCITY_THRESHOLD: f64 = 0.02;

/// EMA factor for position and velocity smoothing
const SMOOTHING: f64 = 0.3;

/// Motion of the platter over one callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScratchMotion {
    /// Position at the start of the callback (frames)
    pub from: f64,
    /// Position at the end of the callback (frames)
    pub to: f64,
    /// Whether the platter moves fast enough to be audible
    pub audible: bool,
}

impl ScratchMotion {
    /// Playback rate that covers `from..to` in `frames` output frames
    pub fn rate(&self, frames: usize) -> f64 {
        if frames == 0 {
            return 0.0;
        }
        (self.to - self.from) / frames as f64
    }
}

/// Scratch state for a single deck
#[derive(Debug, Clone, Default)]
pub struct ScratchState {
    active: bool,
    target: f64,
    smoothed: f64,
    velocity: f64,
}

impl ScratchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Grab the platter at the current deck position
    pub fn start(&mut self, position: f64) {
        self.active = true;
        self.target = position;
        self.smoothed = position;
        self.velocity = 0.0;
    }

    /// Move the platter (called for every UI drag update)
    pub fn move_to(&mut self, position: f64) {
        self.target = position;
    }

    /// Release the platter
    pub fn end(&mut self) {
        self.active = false;
        self.velocity = 0.0;
    }

    /// Advance one callback of `frames` output frames
    pub fn advance(&mut self, frames: usize) -> ScratchMotion {
        let from = self.smoothed;
        self.smoothed += (self.target - self.smoothed) * SMOOTHING;

        let raw_velocity = if frames == 0 {
            0.0
        } else {
            (self.smoothed - from) / frames as f64
        };
        self.velocity += (raw_velocity - self.velocity) * SMOOTHING;

        ScratchMotion {
            from,
            to: self.smoothed,
            audible: self.velocity.abs() >= VELOCITY_THRESHOLD,
        }
    }

    /// Smoothed platter position
    pub fn position(&self) -> f64 {
        self.smoothed
    }
}
