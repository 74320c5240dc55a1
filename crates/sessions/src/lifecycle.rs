//! Idle-session sweep.
//!
//! Sessions time out two ways: the transport's own 30-second inactivity
//! limit, and the configurable `idle_timeout_secs` this sweep enforces.
//! A session has no "reset in place" — once idle too long it is simply
//! disconnected and the session-exit hook runs.

use std::time::Duration;

use crate::store::SessionStore;
use verse_domain::ids::SessionId;

pub struct IdleSweep {
    idle_timeout: Duration,
}

impl IdleSweep {
    pub fn new(idle_timeout_secs: u64) -> Self {
        Self {
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        }
    }

    /// Return the ids of every open session that has been idle longer than
    /// the configured timeout. The caller (the dispatcher's housekeeping
    /// pass) is responsible for actually tearing each one down.
    pub fn sweep(&self, store: &SessionStore) -> Vec<SessionId> {
        store
            .all()
            .into_iter()
            .filter(|s| s.is_open() && s.idle_for() >= self.idle_timeout)
            .map(|s| s.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::config::FlowControlMode;
    use verse_domain::ids::UserId;

    #[test]
    fn fresh_session_is_not_idle() {
        let store = SessionStore::new(16, FlowControlMode::DropOldest);
        store.register(UserId(1));
        let sweep = IdleSweep::new(300);
        assert!(sweep.sweep(&store).is_empty());
    }

    #[test]
    fn zero_timeout_flags_everyone() {
        let store = SessionStore::new(16, FlowControlMode::DropOldest);
        store.register(UserId(1));
        let sweep = IdleSweep::new(0);
        assert_eq!(sweep.sweep(&store).len(), 1);
    }
}
