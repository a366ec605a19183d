//! End-to-end: import, replay, restart restore and drawings, on disk.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use barplay_core::annotations::{DrawingEvent, DrawingPoint};
use barplay_core::domain::Timeframe;
use barplay_core::{ReplayConfig, ReplayDesk};
use tempfile::TempDir;

const KLINES: &str = "open_time,open,high,low,close,volume
1700000000000,100,105,95,102,10
1700000060000,102,106,101,104,11
1700000120000,104,108,103,107,12
1700000180000,107,109,100,101,13
1700000240000,101,103,99,100,14
";

fn config(dir: &TempDir) -> ReplayConfig {
    ReplayConfig {
        data_dir: dir.path().join("state"),
        speed_ms: 10,
        ..ReplayConfig::default()
    }
}

#[test]
fn sessions_and_drawings_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("BTCUSDT.csv");
    fs::write(&source, KLINES).unwrap();

    let id = {
        let mut desk = ReplayDesk::open(config(&dir)).unwrap();
        let outcome = desk.import_file(&source).unwrap();
        assert_eq!(outcome.name, "BTCUSDT");
        desk.add_drawing(DrawingEvent {
            kind: "trendline".into(),
            points: vec![
                DrawingPoint { time: 1_700_000_000, price: 100.0 },
                DrawingPoint { time: 1_700_000_120, price: 107.0 },
            ],
            color: "#00ff00".into(),
            session_id: outcome.id.clone(),
        })
        .unwrap();
        outcome.id
    };

    let mut desk = ReplayDesk::open(config(&dir)).unwrap();
    assert_eq!(desk.active_session(), Some(&id));
    assert_eq!(desk.sessions()[0].name, "BTCUSDT");
    assert_eq!(desk.snapshot().total_count, 5);
    assert_eq!(desk.drawings(&id).len(), 1);
    assert_eq!(desk.row_count().unwrap(), 5);
}

#[test]
fn removed_sessions_stay_removed() {
    let dir = TempDir::new().unwrap();
    let keep = {
        let mut desk = ReplayDesk::open(config(&dir)).unwrap();
        let keep = desk.import_text("keep.csv", KLINES).unwrap().id;
        let gone = desk.import_text("gone.csv", KLINES).unwrap().id;
        desk.remove_session(&gone).unwrap();
        keep
    };

    let desk = ReplayDesk::open(config(&dir)).unwrap();
    let sessions = desk.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, keep);
    assert_eq!(desk.active_session(), Some(&keep));
}

#[test]
fn autoplay_reveals_bars_one_at_a_time() {
    let dir = TempDir::new().unwrap();
    let mut desk = ReplayDesk::open(config(&dir)).unwrap();
    desk.import_text("btc.csv", KLINES).unwrap();
    let updates = desk.subscribe();

    desk.player_mut().play();
    let start = Instant::now();
    let mut seen = Vec::new();
    while start.elapsed() < Duration::from_secs(5) {
        match updates.recv_timeout(Duration::from_millis(100)) {
            Ok(snap) => {
                seen.push(snap.index);
                if !snap.playing {
                    break;
                }
            }
            Err(_) => thread::yield_now(),
        }
    }
    assert_eq!(seen.last(), Some(&4));
    assert!(seen.windows(2).all(|w| w[1] >= w[0]));

    let frame = desk.visible_bars().unwrap();
    assert_eq!(frame.bars.len(), 5);
    assert_eq!(frame.cursor, Some(1_700_000_240));

    desk.set_timeframe(Some(Timeframe::minutes(5)));
    let frame = desk.visible_bars().unwrap();
    assert!(frame.bars.len() <= 2);
    let volume: f64 = frame.bars.iter().map(|b| b.volume).sum();
    assert_eq!(volume, 60.0);
}

#[test]
fn in_memory_desk_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = ReplayConfig {
        persist: false,
        ..config(&dir)
    };
    let mut desk = ReplayDesk::open(config).unwrap();
    desk.import_text("btc.csv", KLINES).unwrap();
    assert!(!dir.path().join("state").exists());
}
