use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::reaper::Reaper;
use crate::clock::Clock;
use crate::models::{Session, UserHandle};

/// In-memory session registry with idle and absolute expiry.
#[derive(Debug)]
pub struct SessionStore {
    clock: Arc<dyn Clock>,
    idle: Duration,
    total: Duration,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, idle: Duration, total: Duration) -> Self {
        Self {
            clock,
            idle,
            total,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn create(&self, user: UserHandle) -> Arc<Session> {
        let session = Arc::new(Session::new(user, self.clock.now()));
        self.sessions
            .write()
            .insert(session.id().to_string(), Arc::clone(&session));
        tracing::debug!(session_id = %session.id(), "Session created");
        session
    }

    /// Looks a session up and marks it accessed. Expired sessions are
    /// destroyed on the spot and read as absent.
    pub fn retrieve(&self, id: &str) -> Option<Arc<Session>> {
        let now = self.clock.now();
        let session = self.sessions.read().get(id).cloned()?;

        if session.is_valid_at(now, self.idle, self.total) {
            session.touch(now);
            Some(session)
        } else {
            self.destroy(id);
            tracing::debug!(session_id = %id, "Expired session destroyed on access");
            None
        }
    }

    pub fn destroy(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    /// Removes every expired session and returns how many went away.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let victims: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| !s.is_valid_at(now, self.idle, self.total))
            .map(|(id, _)| id.clone())
            .collect();

        if victims.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in victims {
            // Re-check: the session may have been touched since collection.
            let expired = sessions
                .get(&id)
                .is_some_and(|s| !s.is_valid_at(now, self.idle, self.total));
            if expired {
                sessions.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Starts the periodic sweep, once per idle window.
    pub fn spawn_gc(self: &Arc<Self>) -> Reaper {
        let store = Arc::clone(self);
        Reaper::spawn("session-gc", self.idle, move || {
            let removed = store.sweep();
            if removed > 0 {
                tracing::info!(removed, remaining = store.len(), "Expired sessions reclaimed");
            }
        })
    }
}
