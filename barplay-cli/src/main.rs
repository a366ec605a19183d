//! Barplay CLI: import bar files and replay them from the terminal.
//!
//! Commands:
//! - `import`: detect, normalize and store one or more files as sessions
//! - `sessions`: list stored sessions, marking the active one
//! - `remove`: delete a session with its bars and drawings
//! - `play`: autoplay the active (or a chosen) session, printing the newest
//!   visible bar at each step

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use barplay_core::domain::{Bar, SessionId, Timeframe};
use barplay_core::{BarFrame, ReplayConfig, ReplayDesk};

#[derive(Parser)]
#[command(name = "barplay", about = "Barplay CLI: bar-by-bar market replay")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session store directory (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import delimited bar files as new sessions.
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List stored sessions.
    Sessions,
    /// Remove a session by id.
    Remove { id: String },
    /// Replay a session, printing each newly revealed bar.
    Play {
        /// Session id. Defaults to the active session.
        #[arg(long)]
        session: Option<String>,

        /// Aggregation timeframe (30s, 1m, 5m, 1h, 1d, ...). Defaults to the
        /// session's base resolution.
        #[arg(long)]
        timeframe: Option<Timeframe>,

        /// Milliseconds per step.
        #[arg(long)]
        speed: Option<u64>,

        /// Stop after this many steps.
        #[arg(long)]
        steps: Option<usize>,

        /// Start from this bar index.
        #[arg(long, default_value_t = 0)]
        from: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("barplay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Import { files } => run_import(config, &files),
        Commands::Sessions => run_sessions(config),
        Commands::Remove { id } => run_remove(config, id),
        Commands::Play {
            session,
            timeframe,
            speed,
            steps,
            from,
        } => run_play(config, session, timeframe, speed, steps, from),
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<ReplayConfig> {
    let mut config = match path {
        Some(path) => ReplayConfig::from_file(path)?,
        None => ReplayConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

fn run_import(config: ReplayConfig, files: &[PathBuf]) -> Result<()> {
    let mut desk = ReplayDesk::open(config)?;
    let mut failed = 0usize;

    for file in files {
        match desk.import_file(file) {
            Ok(outcome) => println!(
                "{}  {:<24} {} bars ({} dropped, {:?}, '{}')",
                outcome.id,
                outcome.name,
                outcome.report.accepted,
                outcome.report.dropped,
                outcome.report.rule,
                outcome.report.delimiter,
            ),
            Err(e) => {
                eprintln!("Error importing {}: {e}", file.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} files failed to import", files.len());
    }
    Ok(())
}

fn run_sessions(config: ReplayConfig) -> Result<()> {
    let desk = ReplayDesk::open(config)?;
    let sessions = desk.sessions();
    if sessions.is_empty() {
        println!("No sessions. Use `barplay import <file>` to add one.");
        return Ok(());
    }
    let active = desk.active_session();
    for meta in sessions {
        let marker = if Some(&meta.id) == active { "*" } else { " " };
        println!("{marker} {}  {}", meta.id, meta.name);
    }
    Ok(())
}

fn run_remove(config: ReplayConfig, id: String) -> Result<()> {
    let mut desk = ReplayDesk::open(config)?;
    desk.remove_session(&SessionId::new(id.clone()))?;
    println!("Removed session {id}");
    Ok(())
}

fn run_play(
    mut config: ReplayConfig,
    session: Option<String>,
    timeframe: Option<Timeframe>,
    speed: Option<u64>,
    steps: Option<usize>,
    from: usize,
) -> Result<()> {
    if let Some(speed) = speed {
        config.speed_ms = speed;
    }
    let mut desk = ReplayDesk::open(config)?;
    if let Some(id) = session {
        desk.switch_session(&SessionId::new(id))?;
    }
    let Some(active) = desk.active_session().cloned() else {
        bail!("no session to play; import a file first");
    };
    if timeframe.is_some() {
        desk.set_timeframe(timeframe);
    }

    desk.player_mut().set_index(from);
    let total = desk.snapshot().total_count;
    println!(
        "Playing {active} ({total} steps, timeframe {}, base {})",
        desk.timeframe(),
        desk.base_resolution()
    );
    print_frame(&desk.visible_bars()?);

    info!(session = %active, speed_ms = desk.config().speed_ms, "replay started");
    follow_replay(&mut desk, steps.unwrap_or(usize::MAX), print_frame)?;

    let snapshot = desk.snapshot();
    println!(
        "Stopped at step {}/{} ({:.1}%)",
        snapshot.index + 1,
        snapshot.total_count,
        snapshot.progress
    );
    Ok(())
}

/// Autoplay from the current index, handing every newly revealed frame to
/// `on_step`. Stops after `limit` steps or at the end of the timeline.
fn follow_replay(
    desk: &mut ReplayDesk,
    limit: usize,
    mut on_step: impl FnMut(&BarFrame),
) -> Result<usize> {
    let mut last_cursor = desk.snapshot().current_timestamp;
    // Subscribed right before play: the first snapshot is the play itself.
    let updates = desk.subscribe();
    desk.player_mut().play();

    let wait = Duration::from_millis(desk.config().speed_ms.saturating_mul(4).max(1_000));
    let mut shown = 0usize;
    while shown < limit {
        let snapshot = updates
            .recv_timeout(wait)
            .context("replay stalled waiting for the next step")?;
        if snapshot.current_timestamp != last_cursor {
            last_cursor = snapshot.current_timestamp;
            on_step(&desk.visible_bars()?);
            shown += 1;
        }
        if !snapshot.playing {
            break;
        }
    }
    desk.player_mut().pause();
    Ok(shown)
}

fn print_frame(frame: &BarFrame) {
    if let Some(bar) = frame.bars.last() {
        println!("{}  [{} bars visible]", format_bar(bar), frame.bars.len());
    }
}

fn format_bar(bar: &Bar) -> String {
    let time = DateTime::from_timestamp(bar.time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| bar.time.to_string());
    format!(
        "{time}  O {:.5}  H {:.5}  L {:.5}  C {:.5}  V {:.2}",
        bar.open, bar.high, bar.low, bar.close, bar.volume
    )
}
