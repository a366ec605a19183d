//! Replay state machine.
//!
//! States: `Idle` (no timestamps) and `Ready` (timestamps loaded, index
//! valid), with an orthogonal playing flag in `Ready`. Every transition keeps
//! `index` inside `[0, len - 1]`.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SPEED_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayPhase {
    Idle,
    Ready,
}

/// Derived values published to consumers after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    pub index: usize,
    pub total_count: usize,
    pub current_timestamp: Option<i64>,
    pub progress: f64,
    pub playing: bool,
    pub speed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ReplayController {
    timestamps: Vec<i64>,
    index: usize,
    playing: bool,
    speed_ms: u64,
}

impl ReplayController {
    pub fn new(speed_ms: u64) -> Self {
        Self {
            timestamps: Vec::new(),
            index: 0,
            playing: false,
            speed_ms: speed_ms.max(1),
        }
    }

    /// Load a timeline: index to 0, paused.
    ///
    /// A sequence identical to the current one leaves the state untouched.
    /// Returns whether anything changed.
    pub fn initialize(&mut self, timestamps: Vec<i64>) -> bool {
        if timestamps == self.timestamps {
            return false;
        }
        self.timestamps = timestamps;
        self.index = 0;
        self.playing = false;
        true
    }

    pub fn phase(&self) -> ReplayPhase {
        if self.timestamps.is_empty() {
            ReplayPhase::Idle
        } else {
            ReplayPhase::Ready
        }
    }

    fn last_index(&self) -> usize {
        self.timestamps.len().saturating_sub(1)
    }

    pub fn step_forward(&mut self, n: usize) {
        self.set_index(self.index.saturating_add(n));
    }

    pub fn step_backward(&mut self, n: usize) {
        self.set_index(self.index.saturating_sub(n));
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index.min(self.last_index());
    }

    pub fn play(&mut self) {
        if !self.timestamps.is_empty() {
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        if !self.timestamps.is_empty() {
            self.playing = false;
        }
    }

    pub fn toggle_play(&mut self) {
        if !self.timestamps.is_empty() {
            self.playing = !self.playing;
        }
    }

    pub fn reset(&mut self) {
        self.pause();
        self.set_index(0);
    }

    pub fn set_speed(&mut self, speed_ms: u64) {
        self.speed_ms = speed_ms.max(1);
    }

    /// One autoplay step. Advances by one and pauses on reaching the end.
    ///
    /// Returns whether playback continues.
    pub fn tick(&mut self) -> bool {
        if !self.playing || self.timestamps.is_empty() {
            return false;
        }
        if self.index < self.last_index() {
            self.index += 1;
        }
        if self.index >= self.last_index() {
            self.playing = false;
        }
        self.playing
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed_ms(&self) -> u64 {
        self.speed_ms
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn total_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn current_timestamp(&self) -> Option<i64> {
        self.timestamps.get(self.index).copied()
    }

    /// Position as a percentage; 0 for timelines of one entry or fewer.
    pub fn progress(&self) -> f64 {
        let len = self.timestamps.len();
        if len <= 1 {
            return 0.0;
        }
        self.index as f64 / (len - 1) as f64 * 100.0
    }

    pub fn snapshot(&self) -> ReplaySnapshot {
        ReplaySnapshot {
            index: self.index,
            total_count: self.total_count(),
            current_timestamp: self.current_timestamp(),
            progress: self.progress(),
            playing: self.playing,
            speed_ms: self.speed_ms,
        }
    }
}

impl Default for ReplayController {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_MS)
    }
}
