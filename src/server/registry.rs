//! Session registry keyed by [`Sid`].
//!
//! The one process-wide mutable structure of a server. Only atomic
//! operations are exposed: insert-if-absent, lookup, remove and drain.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::identifiers::Sid;

use super::session::Session;

/// Live sessions by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<Sid, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` unless its id is taken. Returns `false` if it was.
    pub fn insert(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session.sid()) {
            return false;
        }
        debug!(sid = %session.sid(), "session registered");
        sessions.insert(session.sid().clone(), session);
        true
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, sid: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(sid).cloned()
    }

    /// Removes a session, returning it.
    pub fn remove(&self, sid: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(sid);
        if removed.is_some() {
            debug!(sid, "session unregistered");
        }
        removed
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions.write().drain().map(|(_, session)| session).collect()
    }

    /// Number of live sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no session is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Ids of the live sessions.
    #[must_use]
    pub fn sids(&self) -> Vec<Sid> {
        self.sessions.read().keys().cloned().collect()
    }
}
