//! Drawing annotations: opaque events from the rendering surface.
//!
//! The core never interprets a drawing; it only appends, lists and forgets
//! them per session, persisting each session's list under its own key.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::SessionId;
use crate::persist::{drawings_key, load_json, save_json, KeyValueStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingPoint {
    pub time: i64,
    pub price: f64,
}

/// A drawing primitive as emitted by the chart (`trendline`, `hline`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub points: Vec<DrawingPoint>,
    pub color: String,
    pub session_id: SessionId,
}

#[derive(Default)]
pub struct AnnotationStore {
    by_session: HashMap<SessionId, Vec<DrawingEvent>>,
    persistence: Option<Arc<dyn KeyValueStore>>,
}

impl AnnotationStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_persistence(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            by_session: HashMap::new(),
            persistence: Some(store),
        }
    }

    /// Append a drawing to its session's list.
    pub fn append(&mut self, event: DrawingEvent) {
        let id = event.session_id.clone();
        self.load_if_needed(&id);
        self.by_session.entry(id.clone()).or_default().push(event);
        self.persist(&id);
    }

    /// Drawings for a session, oldest first.
    pub fn list(&mut self, id: &SessionId) -> &[DrawingEvent] {
        self.load_if_needed(id);
        self.by_session.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Forget every drawing of a session, persisted copy included.
    pub fn clear(&mut self, id: &SessionId) {
        self.by_session.remove(id);
        if let Some(store) = &self.persistence {
            if let Err(e) = store.remove(&drawings_key(id)) {
                warn!(session = %id, error = %e, "failed to remove drawings");
            }
        }
    }

    fn load_if_needed(&mut self, id: &SessionId) {
        if self.by_session.contains_key(id) {
            return;
        }
        let Some(store) = &self.persistence else {
            return;
        };
        match load_json::<Vec<DrawingEvent>>(store.as_ref(), &drawings_key(id)) {
            Ok(Some(events)) => {
                self.by_session.insert(id.clone(), events);
            }
            Ok(None) => {}
            Err(e) => warn!(session = %id, error = %e, "stored drawings unreadable"),
        }
    }

    fn persist(&self, id: &SessionId) {
        let (Some(store), Some(events)) = (&self.persistence, self.by_session.get(id)) else {
            return;
        };
        if let Err(e) = save_json(store.as_ref(), &drawings_key(id), events) {
            warn!(session = %id, error = %e, "drawings will not be remembered");
        }
    }
}
