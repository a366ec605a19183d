//! Replay desk: wires registry, store, player and query facade together.
//!
//! Every session activation replaces the store's table under its write lock
//! before the timeline is handed to the player, so queries for the new
//! session are only issued once its bars are fully loaded. A failed load
//! leaves the previous session active and reloads its bars.

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::annotations::{AnnotationStore, DrawingEvent};
use crate::config::ReplayConfig;
use crate::data::{normalize_file, normalize_text, FormatError, IngestReport, NormalizedData};
use crate::domain::{base_resolution, Bar, SessionId, SessionMeta, Timeframe};
use crate::persist::{FileKvStore, KeyValueStore};
use crate::query::{QueryFacade, QueryResponse};
use crate::replay::{Player, ReplayController, ReplaySnapshot};
use crate::session::SessionRegistry;
use crate::store::{StoreError, StoreHandle};

/// How long `visible_bars` waits for the query worker.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DeskError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("query did not complete within {0:?}")]
    QueryTimeout(Duration),
}

/// Result of importing one source.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub id: SessionId,
    pub name: String,
    pub report: IngestReport,
}

/// Bars emitted for one (cursor, timeframe) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct BarFrame {
    pub cursor: Option<i64>,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}

pub struct ReplayDesk {
    config: ReplayConfig,
    registry: SessionRegistry,
    annotations: AnnotationStore,
    store: StoreHandle,
    player: Player,
    query: QueryFacade,
    /// Session whose bars currently fill the store.
    loaded: Option<SessionId>,
    requested_timeframe: Option<Timeframe>,
    base: Timeframe,
    /// Last (cursor, timeframe) a request was issued for.
    last_requested: Option<(Option<i64>, Timeframe)>,
}

impl ReplayDesk {
    /// Open a desk, restoring persisted sessions when `config.persist` is set.
    pub fn open(config: ReplayConfig) -> Result<Self, DeskError> {
        let config = config.clamped();
        let (registry, annotations) = if config.persist {
            let kv: Arc<dyn KeyValueStore> = Arc::new(FileKvStore::new(&config.data_dir));
            (
                SessionRegistry::restore(Arc::clone(&kv)),
                AnnotationStore::with_persistence(kv),
            )
        } else {
            (SessionRegistry::in_memory(), AnnotationStore::in_memory())
        };
        Self::with_parts(config, registry, annotations, StoreHandle::polars())
    }

    /// Assemble a desk from explicit parts and activate the registry's
    /// active session, if any.
    pub fn with_parts(
        config: ReplayConfig,
        registry: SessionRegistry,
        annotations: AnnotationStore,
        store: StoreHandle,
    ) -> Result<Self, DeskError> {
        let base = base_resolution(&[]);
        let mut desk = Self {
            player: Player::new(ReplayController::new(config.speed_ms)),
            query: QueryFacade::new(store.clone(), base),
            requested_timeframe: config.default_timeframe,
            config,
            registry,
            annotations,
            store,
            loaded: None,
            base,
            last_requested: None,
        };
        if let Some(id) = desk.registry.active_id().cloned() {
            desk.activate(&id)?;
            info!(session = %id, sessions = desk.registry.len(), "restored active session");
        }
        Ok(desk)
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub fn import_file(&mut self, path: &Path) -> Result<ImportOutcome, DeskError> {
        let data = normalize_file(path)?;
        self.install(data)
    }

    pub fn import_text(&mut self, source_name: &str, text: &str) -> Result<ImportOutcome, DeskError> {
        let data = normalize_text(source_name, text)?;
        self.install(data)
    }

    fn install(&mut self, data: NormalizedData) -> Result<ImportOutcome, DeskError> {
        let NormalizedData { name, bars, report } = data;
        let times = match self.store.load(&bars, self.config.insert_batch_size) {
            Ok(times) => times,
            Err(e) => {
                self.reload_previous();
                return Err(e.into());
            }
        };
        let id = self.registry.add(name.clone(), bars);
        self.loaded = Some(id.clone());
        self.install_timeline(times);
        info!(
            session = %id,
            name = %name,
            accepted = report.accepted,
            dropped = report.dropped,
            "imported session"
        );
        Ok(ImportOutcome { id, name, report })
    }

    /// Make `id` the active session; its replay restarts from the first bar.
    pub fn switch_session(&mut self, id: &SessionId) -> Result<(), DeskError> {
        if self.registry.get(id).is_none() {
            return Err(DeskError::UnknownSession(id.clone()));
        }
        self.activate(id)?;
        self.registry.switch(id);
        Ok(())
    }

    /// Delete a session along with its persisted bars and drawings.
    pub fn remove_session(&mut self, id: &SessionId) -> Result<(), DeskError> {
        let was_active = self.registry.active_id() == Some(id);
        if !self.registry.remove(id) {
            return Err(DeskError::UnknownSession(id.clone()));
        }
        self.annotations.clear(id);
        if !was_active {
            return Ok(());
        }

        // The removed session's bars must not outlive it, even if the next
        // session fails to load.
        self.loaded = None;
        match self.registry.active_id().cloned() {
            Some(next) => {
                let activated = self.activate(&next);
                if activated.is_err() {
                    self.unload();
                }
                activated
            }
            None => {
                self.unload();
                debug!("last session removed");
                Ok(())
            }
        }
    }

    pub fn sessions(&self) -> Vec<SessionMeta> {
        self.registry.list()
    }

    pub fn active_session(&self) -> Option<&SessionId> {
        self.registry.active_id()
    }

    /// Rows in the store's table, duplicates included.
    pub fn row_count(&self) -> Result<usize, DeskError> {
        Ok(self.store.row_count()?)
    }

    fn activate(&mut self, id: &SessionId) -> Result<(), DeskError> {
        let Some(session) = self.registry.get(id) else {
            return Err(DeskError::UnknownSession(id.clone()));
        };
        match self.store.load(&session.bars, self.config.insert_batch_size) {
            Ok(times) => {
                self.loaded = Some(id.clone());
                self.install_timeline(times);
                Ok(())
            }
            Err(e) => {
                warn!(session = %id, error = %e, "session activation failed");
                self.reload_previous();
                Err(e.into())
            }
        }
    }

    /// Drop the table and empty the timeline.
    fn unload(&mut self) {
        self.store.shutdown();
        self.loaded = None;
        self.install_timeline(Vec::new());
    }

    /// Put the previously loaded session's bars back after a failed load.
    fn reload_previous(&mut self) {
        let Some(prev) = self.loaded.clone() else {
            return;
        };
        let Some(session) = self.registry.get(&prev) else {
            return;
        };
        if let Err(e) = self.store.load(&session.bars, self.config.insert_batch_size) {
            warn!(session = %prev, error = %e, "could not reload previous session");
            self.loaded = None;
        }
    }

    fn install_timeline(&mut self, times: Vec<i64>) {
        self.base = base_resolution(&times);
        self.query.set_base(self.base);
        // Answers for the previous table must never surface.
        self.query.invalidate();
        self.player.initialize(times);
        // Identical timelines are a no-op in the controller, but a session
        // change always restarts from the first bar.
        self.player.reset();
        self.last_requested = None;
    }

    // ── Replay ──────────────────────────────────────────────────────

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    pub fn snapshot(&self) -> ReplaySnapshot {
        self.player.snapshot()
    }

    pub fn subscribe(&self) -> Receiver<ReplaySnapshot> {
        self.player.subscribe()
    }

    /// Base resolution of the active session.
    pub fn base_resolution(&self) -> Timeframe {
        self.base
    }

    /// `None` follows the base resolution.
    pub fn set_timeframe(&mut self, timeframe: Option<Timeframe>) {
        self.requested_timeframe = timeframe;
    }

    /// Timeframe queries are issued for.
    pub fn timeframe(&self) -> Timeframe {
        self.requested_timeframe.unwrap_or(self.base)
    }

    // ── Bars ────────────────────────────────────────────────────────

    /// Issue a query if the cursor or timeframe moved since the last one.
    ///
    /// Returns the request's sequence number when one was issued.
    pub fn refresh(&mut self) -> Option<u64> {
        let key = (self.player.current_timestamp(), self.timeframe());
        if self.last_requested == Some(key) {
            return None;
        }
        self.last_requested = Some(key);
        Some(self.query.request(key.0, key.1))
    }

    /// Bars for the latest request, once its response has arrived.
    pub fn poll_bars(&mut self) -> Option<Result<BarFrame, DeskError>> {
        self.query.poll().map(into_frame)
    }

    /// Query and wait for the bars visible at the current cursor.
    pub fn visible_bars(&mut self) -> Result<BarFrame, DeskError> {
        let key = (self.player.current_timestamp(), self.timeframe());
        self.last_requested = Some(key);
        self.query.request(key.0, key.1);
        match self.query.wait_latest(QUERY_TIMEOUT) {
            Some(resp) => into_frame(resp),
            None => Err(DeskError::QueryTimeout(QUERY_TIMEOUT)),
        }
    }

    // ── Drawings ────────────────────────────────────────────────────

    pub fn add_drawing(&mut self, event: DrawingEvent) -> Result<(), DeskError> {
        if self.registry.get(&event.session_id).is_none() {
            return Err(DeskError::UnknownSession(event.session_id));
        }
        self.annotations.append(event);
        Ok(())
    }

    pub fn drawings(&mut self, id: &SessionId) -> &[DrawingEvent] {
        self.annotations.list(id)
    }
}

impl std::fmt::Debug for ReplayDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayDesk")
            .field("sessions", &self.registry.len())
            .field("loaded", &self.loaded)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

fn into_frame(resp: QueryResponse) -> Result<BarFrame, DeskError> {
    Ok(BarFrame {
        cursor: resp.cursor,
        timeframe: resp.timeframe,
        bars: resp.result?,
    })
}
