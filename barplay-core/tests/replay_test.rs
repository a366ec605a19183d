//! Replay controller invariants and autoplay behaviour.

use std::thread;
use std::time::{Duration, Instant};

use barplay_core::replay::{Player, ReplayController, ReplayPhase};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Forward(usize),
    Backward(usize),
    SetIndex(usize),
    Toggle,
    Reset,
    Tick,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..20usize).prop_map(Op::Forward),
        (0..20usize).prop_map(Op::Backward),
        (0..50usize).prop_map(Op::SetIndex),
        Just(Op::Toggle),
        Just(Op::Reset),
        Just(Op::Tick),
    ]
}

fn apply(c: &mut ReplayController, op: &Op) {
    match *op {
        Op::Forward(n) => c.step_forward(n),
        Op::Backward(n) => c.step_backward(n),
        Op::SetIndex(i) => c.set_index(i),
        Op::Toggle => c.toggle_play(),
        Op::Reset => c.reset(),
        Op::Tick => {
            c.tick();
        }
    }
}

proptest! {
    /// No sequence of transitions moves the index outside the timeline.
    #[test]
    fn index_stays_in_bounds(len in 0usize..30, ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut c = ReplayController::new(10);
        c.initialize((0..len as i64).map(|i| i * 60).collect());
        for op in &ops {
            apply(&mut c, op);
            let snap = c.snapshot();
            prop_assert!(snap.index <= len.saturating_sub(1));
            prop_assert!((0.0..=100.0).contains(&snap.progress));
            prop_assert_eq!(snap.current_timestamp, c.timestamps().get(snap.index).copied());
            if len == 0 {
                prop_assert!(!snap.playing);
            }
        }
    }

    /// Re-initializing with the same sequence keeps index and playing.
    #[test]
    fn identical_initialize_is_a_no_op(len in 2usize..30, steps in 0usize..30, play in any::<bool>()) {
        let times: Vec<i64> = (0..len as i64).collect();
        let mut c = ReplayController::new(10);
        c.initialize(times.clone());
        c.step_forward(steps);
        if play {
            c.play();
        }
        let before = c.snapshot();
        prop_assert!(!c.initialize(times));
        prop_assert_eq!(c.snapshot(), before);
    }
}

#[test]
fn single_element_timeline_has_zero_progress() {
    let mut c = ReplayController::new(10);
    c.initialize(vec![42]);
    assert_eq!(c.phase(), ReplayPhase::Ready);
    c.step_forward(5);
    assert_eq!(c.index(), 0);
    assert_eq!(c.progress(), 0.0);
    assert_eq!(c.current_timestamp(), Some(42));
}

#[test]
fn autoplay_terminates_at_the_last_bar() {
    let mut c = ReplayController::new(10);
    c.initialize(vec![0, 60, 120, 180, 240]);
    let mut player = Player::new(c);
    player.play();

    let start = Instant::now();
    while player.snapshot().playing && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(5));
    }
    let snap = player.snapshot();
    assert!(!snap.playing);
    assert_eq!(snap.index, 4);
    assert_eq!(snap.progress, 100.0);
}
