//! Session connect/disconnect hooks.
//!
//! There is no reverse index from session to node, so [`on_disconnect`]
//! walks every node in the store once, stripping the departing session out
//! of whatever follower/subscriber records it left behind before tearing
//! down its avatar subtree.

use std::sync::Arc;

use verse_domain::ids::{NodeId, SessionId, UserId};
use verse_domain::trace::TraceEvent;
use verse_domain::types::PermissionMask;
use verse_domain::user::OTHER_USERS_UID;
use verse_protocol::node::NodeCmd;
use verse_protocol::Command;
use verse_sessions::{Session, SessionStore};

use crate::handlers::{request_node_destroy, try_reclaim_layer, try_reclaim_node, try_reclaim_tag, try_reclaim_taggroup};
use crate::node::NodeStore;
use crate::subscribers::DEFAULT_PRIORITY;
use crate::subscription;

/// Run once a session has authenticated: register it, create its avatar
/// node under `avatar-parent` with
/// `(user: READ|WRITE, other_users: READ)`, and notify whoever is already
/// subscribed to `avatar-parent`.
pub fn on_connect(nodes: &NodeStore, sessions: &SessionStore, user_id: UserId) -> Arc<Session> {
    let session = sessions.register(user_id);

    let node_id = nodes
        .create(NodeId::AVATAR_PARENT, user_id, 0)
        .expect("avatar-parent is part of the bootstrap skeleton and always has allocator headroom");
    nodes.nodes.with_mut(node_id, |n| {
        n.acl.set_perm(user_id, PermissionMask::READ | PermissionMask::WRITE);
        n.acl.set_perm(OTHER_USERS_UID, PermissionMask::READ);
    });
    session.set_avatar_id(node_id);
    TraceEvent::EntityCreated { kind: "avatar", id: node_id.0, node_id: NodeId::AVATAR_PARENT.0 }.emit();

    let subs = nodes.nodes.with(NodeId::AVATAR_PARENT, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in subs {
        let priority = nodes
            .nodes
            .with(NodeId::AVATAR_PARENT, |n| n.subscribers.priority_of(sub))
            .flatten()
            .unwrap_or(DEFAULT_PRIORITY);
        subscription::send_node_create(nodes, sessions, sub, node_id, priority);
    }

    session
}

/// Run once a session's transport has gone away: release any lock it
/// held, strip it from every follower/subscriber list in the graph,
/// destroy its avatar subtree, and finally drop it from the session
/// store.
pub fn on_disconnect(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId) {
    let avatar_id = sessions.get(session_id).and_then(|s| s.avatar_id());

    for node_id in nodes.nodes.keys() {
        release_lock_if_held(nodes, sessions, node_id, session_id);
        strip_node_follower(nodes, node_id, session_id);
    }

    if let Some(avatar_id) = avatar_id {
        destroy_subtree(nodes, sessions, avatar_id);
        TraceEvent::SessionDisconnected { session_id: session_id.0, avatar_id: avatar_id.0 }.emit();
    }

    sessions.remove(session_id);
}

fn release_lock_if_held(nodes: &NodeStore, sessions: &SessionStore, node_id: NodeId, session_id: SessionId) {
    let released = nodes
        .nodes
        .with_mut(node_id, |n| {
            if n.lock_holder == Some(session_id) {
                n.lock_holder = None;
                true
            } else {
                false
            }
        })
        .unwrap_or(false);
    if !released {
        return;
    }
    let subs = nodes.nodes.with(node_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in subs {
        let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(sub)).flatten().unwrap_or(DEFAULT_PRIORITY);
        subscription::send(sessions, sub, priority, Command::Node(NodeCmd::Unlock { node_id }));
    }
}

fn strip_node_follower(nodes: &NodeStore, node_id: NodeId, session_id: SessionId) {
    nodes.nodes.with_mut(node_id, |n| {
        n.subscribers.remove(session_id);
        n.lifecycle.force_remove_follower(session_id);
    });
    try_reclaim_node(nodes, node_id);

    let tg_ids = nodes.nodes.with(node_id, |n| n.tag_groups.keys()).unwrap_or_default();
    for tg_id in tg_ids {
        let tag_ids = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.tags.keys())).flatten().unwrap_or_default();
        for tag_id in tag_ids {
            nodes.nodes.with(node_id, |n| {
                n.tag_groups.with_mut(tg_id, |tg| tg.tags.with_mut(tag_id, |t| t.lifecycle.force_remove_follower(session_id)))
            });
            try_reclaim_tag(nodes, node_id, tg_id, tag_id);
        }
        nodes.nodes.with(node_id, |n| {
            n.tag_groups.with_mut(tg_id, |tg| {
                tg.subscribers.remove(session_id);
                tg.lifecycle.force_remove_follower(session_id)
            })
        });
        try_reclaim_taggroup(nodes, node_id, tg_id);
    }

    let layer_ids = nodes.nodes.with(node_id, |n| n.layers.keys()).unwrap_or_default();
    for layer_id in layer_ids {
        nodes.nodes.with(node_id, |n| {
            n.layers.with_mut(layer_id, |l| {
                l.subscribers.remove(session_id);
                l.lifecycle.force_remove_follower(session_id)
            })
        });
        try_reclaim_layer(nodes, node_id, layer_id);
    }
}

/// Post-order: destroy every descendant before the node itself, same order
/// `request_node_destroy` already requires (it refuses a node with live
/// children).
fn destroy_subtree(nodes: &NodeStore, sessions: &SessionStore, node_id: NodeId) {
    let children = nodes.nodes.with(node_id, |n| n.children.clone()).unwrap_or_default();
    for child_id in children {
        destroy_subtree(nodes, sessions, child_id);
    }
    request_node_destroy(nodes, sessions, node_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::config::FlowControlMode;
    use verse_domain::user::SUPER_USER_UID;

    fn fresh() -> (NodeStore, SessionStore) {
        let nodes = NodeStore::new();
        crate::bootstrap::bootstrap(&nodes, &[]);
        let sessions = SessionStore::new(64, FlowControlMode::DropOldest);
        (nodes, sessions)
    }

    #[test]
    fn connect_creates_avatar_under_avatar_parent() {
        let (nodes, sessions) = fresh();
        let session = on_connect(&nodes, &sessions, UserId(42));
        let avatar_id = session.avatar_id().unwrap();
        assert!(nodes.nodes.contains(avatar_id));
        let parent = nodes.nodes.with(avatar_id, |n| n.parent).unwrap();
        assert_eq!(parent, Some(NodeId::AVATAR_PARENT));
        assert!(nodes.nodes.with(avatar_id, |n| n.acl.can_write(UserId(42))).unwrap());
        assert!(nodes.nodes.with(avatar_id, |n| n.acl.can_read(OTHER_USERS_UID)).unwrap());
    }

    #[test]
    fn disconnect_releases_lock_and_drops_follower_records() {
        let (nodes, sessions) = fresh();
        let session = on_connect(&nodes, &sessions, SUPER_USER_UID);
        nodes.nodes.with_mut(NodeId::ROOT, |n| n.acl.set_perm(SUPER_USER_UID, PermissionMask::READ | PermissionMask::WRITE));
        subscription::subscribe_node(&nodes, &sessions, session.id, NodeId::ROOT, 0);
        nodes.nodes.with_mut(NodeId::ROOT, |n| n.lock_holder = Some(session.id));

        on_disconnect(&nodes, &sessions, session.id);

        assert_eq!(nodes.nodes.with(NodeId::ROOT, |n| n.lock_holder).unwrap(), None);
        assert!(!nodes.nodes.with(NodeId::ROOT, |n| n.subscribers.contains(session.id)).unwrap());
        assert!(sessions.get(session.id).is_none());
    }

    #[test]
    fn disconnect_destroys_the_avatar_subtree() {
        let (nodes, sessions) = fresh();
        let session = on_connect(&nodes, &sessions, SUPER_USER_UID);
        let avatar_id = session.avatar_id().unwrap();

        on_disconnect(&nodes, &sessions, session.id);

        assert!(!nodes.nodes.contains(avatar_id));
    }
}
