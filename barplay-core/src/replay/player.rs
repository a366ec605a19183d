//! Player: the replay controller plus its autoplay timer.
//!
//! The controller lives behind a mutex shared with at most one timer thread.
//! Whenever speed, playing or timeline length changes, the running timer is
//! cancelled and a new one started, so a new speed applies from the next tick.
//!
//! Each timer carries a generation number; bumping the generation under the
//! lock guarantees a cancelled timer can never tick again, even if it was
//! already waiting for the lock.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use super::controller::{ReplayController, ReplaySnapshot};

struct Shared {
    controller: ReplayController,
    subscribers: Vec<Sender<ReplaySnapshot>>,
    generation: u64,
}

impl Shared {
    fn notify(&mut self) {
        let snapshot = self.controller.snapshot();
        self.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

/// What a running timer was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerKey {
    speed_ms: u64,
    len: usize,
}

struct AutoplayTimer {
    key: TimerKey,
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Player {
    shared: Arc<Mutex<Shared>>,
    timer: Option<AutoplayTimer>,
}

impl Player {
    pub fn new(controller: ReplayController) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                controller,
                subscribers: Vec::new(),
                generation: 0,
            })),
            timer: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a transition, publish the new snapshot, then resync the timer.
    fn apply<R>(&mut self, f: impl FnOnce(&mut ReplayController) -> R) -> R {
        let result = {
            let mut shared = self.lock();
            let result = f(&mut shared.controller);
            shared.notify();
            result
        };
        self.sync_timer();
        result
    }

    /// Receive a snapshot after every transition, autoplay ticks included.
    pub fn subscribe(&self) -> Receiver<ReplaySnapshot> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self) -> ReplaySnapshot {
        self.lock().controller.snapshot()
    }

    pub fn current_timestamp(&self) -> Option<i64> {
        self.lock().controller.current_timestamp()
    }

    pub fn initialize(&mut self, timestamps: Vec<i64>) -> bool {
        self.apply(|c| c.initialize(timestamps))
    }

    pub fn step_forward(&mut self, n: usize) {
        self.apply(|c| c.step_forward(n))
    }

    pub fn step_backward(&mut self, n: usize) {
        self.apply(|c| c.step_backward(n))
    }

    pub fn set_index(&mut self, index: usize) {
        self.apply(|c| c.set_index(index))
    }

    pub fn play(&mut self) {
        self.apply(ReplayController::play)
    }

    pub fn pause(&mut self) {
        self.apply(ReplayController::pause)
    }

    pub fn toggle_play(&mut self) {
        self.apply(ReplayController::toggle_play)
    }

    pub fn reset(&mut self) {
        self.apply(ReplayController::reset)
    }

    pub fn set_speed(&mut self, speed_ms: u64) {
        self.apply(|c| c.set_speed(speed_ms))
    }

    /// Start, keep or cancel the autoplay timer to match the controller.
    fn sync_timer(&mut self) {
        let (desired, generation) = {
            let mut shared = self.lock();
            let c = &shared.controller;
            let desired = (c.is_playing() && c.total_count() > 0).then(|| TimerKey {
                speed_ms: c.speed_ms(),
                len: c.total_count(),
            });

            let keep = match (&self.timer, desired) {
                (Some(timer), Some(key)) => timer.key == key && !timer.handle.is_finished(),
                (None, None) => true,
                _ => false,
            };
            if keep {
                return;
            }
            shared.generation += 1;
            (desired, shared.generation)
        };

        self.cancel_timer();
        if let Some(key) = desired {
            self.timer = Some(spawn_timer(Arc::clone(&self.shared), key, generation));
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            drop(timer.cancel);
            let _ = timer.handle.join();
            trace!("autoplay timer cancelled");
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new(ReplayController::default())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.lock().generation += 1;
        self.cancel_timer();
    }
}

fn spawn_timer(shared: Arc<Mutex<Shared>>, key: TimerKey, generation: u64) -> AutoplayTimer {
    let (cancel, cancelled) = mpsc::channel::<()>();
    let interval = Duration::from_millis(key.speed_ms);
    debug!(speed_ms = key.speed_ms, len = key.len, generation, "autoplay timer started");

    let handle = thread::Builder::new()
        .name("barplay-autoplay".into())
        .spawn(move || loop {
            match cancelled.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
                    if shared.generation != generation {
                        break;
                    }
                    let keep_going = shared.controller.tick();
                    shared.notify();
                    if !keep_going {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .expect("failed to spawn autoplay thread");

    AutoplayTimer {
        key,
        cancel,
        handle,
    }
}
