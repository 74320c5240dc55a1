//! Generic entity lifecycle FSM, shared by nodes, tag groups, tags and
//! layers via composition (`lifecycle: Lifecycle` field on each).
//!
//! The key invariant this type exists to enforce: a `destroy` is never
//! emitted to a follower that has not yet acked `create`. If a delete is
//! requested while a follower is still `Creating`, [`Lifecycle::try_send_destroy`]
//! refuses and the caller must retry from [`Lifecycle::on_create_ack`]'s
//! `send_destroy_now` outcome once that follower catches up.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use verse_domain::ids::SessionId;

/// State shared by both entity-level and per-follower state — a follower
/// and the entity it follows move through the same five-state domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Reserved,
    Creating,
    Created,
    Deleting,
    Deleted,
}

/// Result of delivering a `create_ack` to the lifecycle machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateAckOutcome {
    /// The entity transitioned to `Created` as a result (every follower is
    /// now `Created`).
    pub entity_created: bool,
    /// A `destroy` for this same follower was deferred earlier (it was
    /// still `Creating` when destroy was requested) and must be sent now.
    pub send_destroy_now: bool,
}

/// Entity-level state plus the per-follower state table, reused unmodified
/// across `Node`, `TagGroup`, `Tag` and `Layer`.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LifecycleState,
    followers: HashMap<SessionId, LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Reserved,
            followers: HashMap::new(),
        }
    }

    /// An entity with no followers that starts life already `Created`,
    /// used only by bootstrap to stand up the system-node skeleton before
    /// any session exists to drive the normal follower-acked progression.
    pub fn new_created() -> Self {
        Self {
            state: LifecycleState::Created,
            followers: HashMap::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Precondition for `subscribe`: node must be `Creating` or `Created`.
    pub fn is_creating_or_created(&self) -> bool {
        matches!(self.state, LifecycleState::Creating | LifecycleState::Created)
    }

    /// `true` unless the entity is past the point of being announced —
    /// `Reserved` included, since an entity can sit there indefinitely if
    /// it had no subscriber at creation time, and a later subscriber must
    /// still be able to pick it up. Everything that decides whether to
    /// *announce* an entity to a (possibly new) follower should gate on
    /// this rather than [`Self::is_creating_or_created`], which instead
    /// answers "has at least one follower already been told".
    pub fn is_announceable(&self) -> bool {
        !matches!(self.state, LifecycleState::Deleting | LifecycleState::Deleted)
    }

    pub fn follower_state(&self, session: SessionId) -> Option<LifecycleState> {
        self.followers.get(&session).copied()
    }

    pub fn is_follower(&self, session: SessionId) -> bool {
        self.followers.contains_key(&session)
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    pub fn followers(&self) -> Vec<SessionId> {
        self.followers.keys().copied().collect()
    }

    /// `send_create` succeeded for `session`: new follower record at
    /// `Creating`; entity moves `Reserved -> Creating` on its first
    /// follower.
    pub fn on_send_create_succeeded(&mut self, session: SessionId) {
        self.followers.insert(session, LifecycleState::Creating);
        if self.state == LifecycleState::Reserved {
            self.state = LifecycleState::Creating;
        }
    }

    /// `create_ack` received from `session`.
    pub fn on_create_ack(&mut self, session: SessionId) -> CreateAckOutcome {
        if let Some(follower) = self.followers.get_mut(&session) {
            if *follower == LifecycleState::Creating {
                *follower = LifecycleState::Created;
            }
        }

        let all_created = !self.followers.is_empty()
            && self.followers.values().all(|s| *s == LifecycleState::Created);
        if all_created && self.state == LifecycleState::Creating {
            self.state = LifecycleState::Created;
        }

        let send_destroy_now = self.state == LifecycleState::Deleting
            && self.followers.get(&session) == Some(&LifecycleState::Created);

        CreateAckOutcome {
            entity_created: all_created,
            send_destroy_now,
        }
    }

    /// `destroy` requested on the entity itself.
    pub fn on_destroy_requested(&mut self) {
        self.state = LifecycleState::Deleting;
    }

    /// Attempt to send `destroy` to one follower. Returns `true` if the
    /// send should go out now (the follower was `Created`); `false` means
    /// the follower is still `Creating` and the send is deferred until its
    /// `create_ack` arrives.
    pub fn try_send_destroy(&mut self, session: SessionId) -> bool {
        match self.followers.get_mut(&session) {
            Some(state) if *state == LifecycleState::Created => {
                *state = LifecycleState::Deleting;
                true
            }
            _ => false,
        }
    }

    /// `destroy_ack` received from `session`. Returns `true` if the
    /// follower set is now empty, meaning the entity is fully `Deleted`
    /// and eligible for physical reclamation.
    pub fn on_destroy_ack(&mut self, session: SessionId) -> bool {
        self.followers.remove(&session);
        if self.followers.is_empty() {
            self.state = LifecycleState::Deleted;
            true
        } else {
            false
        }
    }

    /// Force-remove a follower without an ack, used by the session
    /// disconnect hook when a session departs mid-lifecycle. Returns
    /// `true` if the entity is now fully `Deleted`.
    pub fn force_remove_follower(&mut self, session: SessionId) -> bool {
        self.followers.remove(&session);
        if self.state == LifecycleState::Deleting && self.followers.is_empty() {
            self.state = LifecycleState::Deleted;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_follower_moves_entity_to_creating() {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.state(), LifecycleState::Reserved);
        lc.on_send_create_succeeded(SessionId(1));
        assert_eq!(lc.state(), LifecycleState::Creating);
    }

    #[test]
    fn entity_created_only_when_every_follower_acked() {
        let mut lc = Lifecycle::new();
        lc.on_send_create_succeeded(SessionId(1));
        lc.on_send_create_succeeded(SessionId(2));
        let outcome1 = lc.on_create_ack(SessionId(1));
        assert!(!outcome1.entity_created);
        assert_eq!(lc.state(), LifecycleState::Creating);
        let outcome2 = lc.on_create_ack(SessionId(2));
        assert!(outcome2.entity_created);
        assert_eq!(lc.state(), LifecycleState::Created);
    }

    #[test]
    fn destroy_is_deferred_until_create_acked() {
        let mut lc = Lifecycle::new();
        lc.on_send_create_succeeded(SessionId(1));
        // destroy requested before the follower has acked create
        lc.on_destroy_requested();
        assert!(!lc.try_send_destroy(SessionId(1)));
        assert_eq!(lc.follower_state(SessionId(1)), Some(LifecycleState::Creating));

        // the ack arrives; the handler must now (re)attempt the destroy
        let outcome = lc.on_create_ack(SessionId(1));
        assert!(outcome.send_destroy_now);
        assert!(lc.try_send_destroy(SessionId(1)));
        assert_eq!(lc.follower_state(SessionId(1)), Some(LifecycleState::Deleting));
    }

    #[test]
    fn entity_deleted_once_follower_set_drains() {
        let mut lc = Lifecycle::new();
        lc.on_send_create_succeeded(SessionId(1));
        lc.on_create_ack(SessionId(1));
        lc.on_destroy_requested();
        assert!(lc.try_send_destroy(SessionId(1)));
        assert!(lc.on_destroy_ack(SessionId(1)));
        assert_eq!(lc.state(), LifecycleState::Deleted);
        assert_eq!(lc.follower_count(), 0);
    }

    #[test]
    fn never_sends_destroy_before_create_ack() {
        // Regression test for the headline invariant: no matter the
        // ordering of events, try_send_destroy never succeeds for a
        // follower still in Creating.
        let mut lc = Lifecycle::new();
        lc.on_send_create_succeeded(SessionId(7));
        lc.on_destroy_requested();
        for _ in 0..3 {
            assert!(!lc.try_send_destroy(SessionId(7)));
        }
    }
}
