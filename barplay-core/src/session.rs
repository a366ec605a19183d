//! Session registry: owns every loaded dataset and tracks the active one.
//!
//! Identities (`SessionMeta`) and bar payloads are persisted under separate
//! keys. Persistence is best-effort throughout: failures are logged and the
//! in-memory registry stays authoritative.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{Bar, SessionId, SessionMeta};
use crate::persist::{
    bars_key, load_json, save_json, KeyValueStore, PersistenceError, ACTIVE_KEY, SESSIONS_KEY,
};

/// One independently loaded dataset.
#[derive(Debug, Clone)]
pub struct Session {
    pub meta: SessionMeta,
    pub bars: Vec<Bar>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

pub struct SessionRegistry {
    sessions: Vec<Session>,
    active: Option<SessionId>,
    persistence: Option<Arc<dyn KeyValueStore>>,
}

impl SessionRegistry {
    /// Registry that remembers nothing across restarts.
    pub fn in_memory() -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            persistence: None,
        }
    }

    /// Restore previously persisted sessions from `store`.
    ///
    /// Sessions whose bar payload is missing, empty or unreadable are dropped.
    pub fn restore(store: Arc<dyn KeyValueStore>) -> Self {
        let metas: Vec<SessionMeta> = match load_json(store.as_ref(), SESSIONS_KEY) {
            Ok(list) => list.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "session list unreadable, starting empty");
                Vec::new()
            }
        };
        let listed = metas.len();

        let sessions: Vec<Session> = metas
            .into_iter()
            .filter_map(|meta| {
                match load_json::<Vec<Bar>>(store.as_ref(), &bars_key(&meta.id)) {
                    Ok(Some(bars)) if !bars.is_empty() => Some(Session { meta, bars }),
                    Ok(_) => {
                        debug!(session = %meta.id, "dropping session without payload");
                        None
                    }
                    Err(e) => {
                        debug!(session = %meta.id, error = %e, "dropping session with unreadable payload");
                        None
                    }
                }
            })
            .collect();

        let remembered: Option<SessionId> = load_json(store.as_ref(), ACTIVE_KEY).ok().flatten();
        let active = remembered
            .filter(|id| sessions.iter().any(|s| s.id() == id))
            .or_else(|| sessions.first().map(|s| s.id().clone()));

        let mut registry = Self {
            sessions,
            active,
            persistence: Some(store),
        };
        if registry.sessions.len() != listed {
            registry.persist_identities();
        }
        info!(
            restored = registry.sessions.len(),
            dropped = listed - registry.sessions.len(),
            "session registry restored"
        );
        registry
    }

    /// Register a new session and make it active.
    pub fn add(&mut self, name: impl Into<String>, bars: Vec<Bar>) -> SessionId {
        let name = name.into();
        let id = SessionId::generate(&name);
        self.best_effort("save bars", |kv| save_json(kv, &bars_key(&id), &bars));

        self.sessions.push(Session {
            meta: SessionMeta {
                id: id.clone(),
                name,
            },
            bars,
        });
        self.active = Some(id.clone());
        self.persist_identities();
        self.persist_active();
        id
    }

    /// Delete a session and its payload. Returns false for unknown ids.
    ///
    /// Removing the active session activates the first remaining one.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        let Some(pos) = self.sessions.iter().position(|s| s.id() == id) else {
            return false;
        };
        self.sessions.remove(pos);
        self.best_effort("remove bars", |kv| kv.remove(&bars_key(id)));

        if self.active.as_ref() == Some(id) {
            self.active = self.sessions.first().map(|s| s.id().clone());
            self.persist_active();
        }
        self.persist_identities();
        true
    }

    /// Change the active id. Returns false for unknown ids.
    pub fn switch(&mut self, id: &SessionId) -> bool {
        if !self.sessions.iter().any(|s| s.id() == id) {
            return false;
        }
        self.active = Some(id.clone());
        self.persist_active();
        true
    }

    pub fn active_id(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    pub fn active(&self) -> Option<&Session> {
        let id = self.active.as_ref()?;
        self.get(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn list(&self) -> Vec<SessionMeta> {
        self.sessions.iter().map(|s| s.meta.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn persist_identities(&self) {
        let metas = self.list();
        self.best_effort("save session list", |kv| save_json(kv, SESSIONS_KEY, &metas));
    }

    fn persist_active(&self) {
        let active = self.active.clone();
        self.best_effort("save active session", |kv| match &active {
            Some(id) => save_json(kv, ACTIVE_KEY, id),
            None => kv.remove(ACTIVE_KEY),
        });
    }

    fn best_effort<F>(&self, what: &str, op: F)
    where
        F: FnOnce(&dyn KeyValueStore) -> Result<(), PersistenceError>,
    {
        if let Some(store) = &self.persistence {
            if let Err(e) = op(store.as_ref()) {
                warn!(error = %e, "{what} failed; session will not be remembered");
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}
