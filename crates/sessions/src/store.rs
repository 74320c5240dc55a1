//! Registry of connected sessions.
//!
//! Unlike the node graph, the session store has no reverse index from node
//! to session — the disconnect hook walks every node to remove a departing
//! session's follower/subscriber records, which is why this store only
//! needs to support id-keyed lookup, insert and remove.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use verse_domain::config::FlowControlMode;
use verse_domain::ids::{SessionId, UserId};

use crate::session::Session;

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    inbound_capacity: usize,
    flow_control: FlowControlMode,
}

impl SessionStore {
    pub fn new(inbound_capacity: usize, flow_control: FlowControlMode) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            inbound_capacity,
            flow_control,
        }
    }

    /// Register a newly authenticated connection and return its session.
    pub fn register(&self, user_id: UserId) -> Arc<Session> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(
            id,
            user_id,
            self.inbound_capacity,
            self.flow_control,
        ));
        self.sessions.write().insert(id, session.clone());
        tracing::debug!(session_id = %id, user_id = %user_id, "session registered");
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Remove a session from the store. The caller is responsible for
    /// running the node-graph teardown before or after this — the store
    /// itself holds no graph references.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(&id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "session removed");
        }
        removed
    }

    /// Every currently-registered session, open or not. The dispatcher
    /// filters to `Open` itself.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_increasing_ids() {
        let store = SessionStore::new(16, FlowControlMode::DropOldest);
        let a = store.register(UserId(1));
        let b = store.register(UserId(2));
        assert!(b.id.0 > a.id.0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn remove_drops_from_store() {
        let store = SessionStore::new(16, FlowControlMode::DropOldest);
        let s = store.register(UserId(1));
        assert!(store.remove(s.id).is_some());
        assert!(store.get(s.id).is_none());
    }
}
