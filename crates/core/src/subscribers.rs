//! The *subscriber* half of the follower/subscriber distinction.
//!
//! The *follower* half is already modeled by [`crate::entity::Lifecycle`]'s
//! per-session state table — a follower is exactly a session with a
//! lifecycle record. A subscriber is additionally a member of this list,
//! which is where per-node fan-out priority lives. Every entity kind
//! (node, tag group, tag, layer) that can be subscribed to owns one of
//! these; a tag's own followers (create/destroy acks) still live purely in
//! its `Lifecycle`, since tags are subscribed to only via their containing
//! tag group.

use verse_domain::ids::SessionId;

/// Default fan-out priority applied to a freshly-subscribed entity unless
/// overridden by `node_prio`.
pub const DEFAULT_PRIORITY: u8 = 0;

#[derive(Debug, Clone, Copy)]
struct Entry {
    session: SessionId,
    priority: u8,
}

/// Insertion-ordered set of subscribing sessions, each carrying the
/// priority to apply to commands generated for it against this entity's
/// subtree.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    entries: Vec<Entry>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.entries.iter().any(|e| e.session == session)
    }

    /// Insert `session` at `priority`. No-op (returns `false`) if already
    /// present — re-subscribing is rejected at the caller level, which
    /// checks `contains` first and only calls this once. Kept defensive
    /// here regardless.
    pub fn add(&mut self, session: SessionId, priority: u8) -> bool {
        if self.contains(session) {
            return false;
        }
        self.entries.push(Entry { session, priority });
        true
    }

    pub fn remove(&mut self, session: SessionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.session != session);
        self.entries.len() != before
    }

    pub fn priority_of(&self, session: SessionId) -> Option<u8> {
        self.entries.iter().find(|e| e.session == session).map(|e| e.priority)
    }

    /// Update `session`'s priority in place; used by `node_prio`. No-op if
    /// the session is not a subscriber.
    pub fn set_priority(&mut self, session: SessionId, priority: u8) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.session == session) {
            e.priority = priority;
        }
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.entries.iter().map(|e| e.session).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_not_idempotent_and_reports_it() {
        let mut subs = Subscribers::new();
        assert!(subs.add(SessionId(1), DEFAULT_PRIORITY));
        assert!(!subs.add(SessionId(1), 5));
        assert_eq!(subs.priority_of(SessionId(1)), Some(DEFAULT_PRIORITY));
    }

    #[test]
    fn set_priority_updates_in_place() {
        let mut subs = Subscribers::new();
        subs.add(SessionId(1), DEFAULT_PRIORITY);
        subs.set_priority(SessionId(1), 9);
        assert_eq!(subs.priority_of(SessionId(1)), Some(9));
    }

    #[test]
    fn remove_drops_entry() {
        let mut subs = Subscribers::new();
        subs.add(SessionId(1), DEFAULT_PRIORITY);
        assert!(subs.remove(SessionId(1)));
        assert!(!subs.contains(SessionId(1)));
        assert!(!subs.remove(SessionId(1)));
    }
}
