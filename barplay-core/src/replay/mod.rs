//! Replay: the time cursor over a session's distinct timestamps.
//!
//! `ReplayController` is the pure state machine. `Player` wraps it with the
//! autoplay timer and snapshot subscriptions.

pub mod controller;
pub mod player;

pub use controller::{ReplayController, ReplayPhase, ReplaySnapshot, DEFAULT_SPEED_MS};
pub use player::Player;
