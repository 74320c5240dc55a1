//! Routes synthesized [`Ack`] commands into the lifecycle FSM of whichever
//! entity they name.
//!
//! An ack never mutates application state — it only advances a follower's
//! lifecycle state and, where the FSM says so, triggers a deferred destroy
//! or a reclamation that [`crate::handlers`] could not do at `destroy` time
//! because a follower was still `Creating`.

use verse_domain::ids::{NodeId, SessionId};
use verse_protocol::ack::Ack;
use verse_protocol::layer::{LayerCmd, LayerOp};
use verse_protocol::node::NodeCmd;
use verse_protocol::tag::{TagCmd, TagOp};
use verse_protocol::taggroup::{TagGroupCmd, TagGroupOp};
use verse_protocol::Command;
use verse_sessions::SessionStore;

use crate::handlers::{try_reclaim_layer, try_reclaim_node, try_reclaim_tag, try_reclaim_taggroup};
use crate::node::NodeStore;
use crate::subscribers::DEFAULT_PRIORITY;
use crate::subscription;

pub fn handle(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, ack: Ack) {
    match ack {
        Ack::NodeCreate { node_id } => {
            let outcome = nodes.nodes.with_mut(node_id, |n| n.lifecycle.on_create_ack(session_id));
            if let Some(outcome) = outcome {
                if outcome.send_destroy_now {
                    send_node_destroy_now(nodes, sessions, node_id, session_id);
                }
            }
        }
        Ack::NodeDestroy { node_id } => {
            let emptied = nodes.nodes.with_mut(node_id, |n| n.lifecycle.on_destroy_ack(session_id)).unwrap_or(false);
            if emptied {
                try_reclaim_node(nodes, node_id);
            }
        }
        // The per-follower FSM has no lock/unlock state of its own — the
        // lock holder is a single `Option<SessionId>` on the node, already
        // updated synchronously by `handlers::lock_node`/`unlock_node`
        // before the command is even sent. Nothing left to do here.
        Ack::NodeLock { .. } | Ack::NodeUnlock { .. } => {}

        Ack::TagGroupCreate { node_id, tg_id } => {
            let outcome = nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.lifecycle.on_create_ack(session_id))).flatten();
            if let Some(outcome) = outcome {
                if outcome.send_destroy_now {
                    send_taggroup_destroy_now(nodes, sessions, node_id, tg_id, session_id);
                }
            }
        }
        Ack::TagGroupDestroy { node_id, tg_id } => {
            let emptied = nodes
                .nodes
                .with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.lifecycle.on_destroy_ack(session_id)))
                .flatten()
                .unwrap_or(false);
            if emptied {
                try_reclaim_taggroup(nodes, node_id, tg_id);
            }
        }

        Ack::TagCreate { node_id, tg_id, tag_id } => {
            // A tag that already carries a value must deliver it to this
            // follower before the follower is allowed to reach `Created`
            // for that tag — otherwise a value set between
            // `tag_create` being sent and this ack arriving would be lost
            // to this follower forever, since `set_tag` only broadcasts to
            // followers already `Created`.
            let pending_value = nodes
                .nodes
                .with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.tags.with(tag_id, |t| t.value.clone())))
                .flatten()
                .flatten()
                .flatten();
            if let Some(value) = pending_value {
                let priority = nodes
                    .nodes
                    .with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.subscribers.priority_of(session_id)))
                    .flatten()
                    .flatten()
                    .unwrap_or(DEFAULT_PRIORITY);
                subscription::send(sessions, session_id, priority, Command::Tag(TagCmd { node_id, tg_id, op: TagOp::Set { tag_id, value } }));
            }

            let outcome = nodes
                .nodes
                .with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.with_mut(tag_id, |t| t.lifecycle.on_create_ack(session_id))))
                .flatten()
                .flatten();
            if let Some(outcome) = outcome {
                if outcome.send_destroy_now {
                    send_tag_destroy_now(nodes, sessions, node_id, tg_id, tag_id, session_id);
                }
            }
        }
        Ack::TagDestroy { node_id, tg_id, tag_id } => {
            let emptied = nodes
                .nodes
                .with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.with_mut(tag_id, |t| t.lifecycle.on_destroy_ack(session_id))))
                .flatten()
                .flatten()
                .unwrap_or(false);
            if emptied {
                try_reclaim_tag(nodes, node_id, tg_id, tag_id);
            }
        }

        Ack::LayerCreate { node_id, layer_id } => {
            let outcome = nodes.nodes.with(node_id, |n| n.layers.with_mut(layer_id, |l| l.lifecycle.on_create_ack(session_id))).flatten();
            if let Some(outcome) = outcome {
                if outcome.send_destroy_now {
                    send_layer_destroy_now(nodes, sessions, node_id, layer_id, session_id);
                }
            }
        }
        Ack::LayerDestroy { node_id, layer_id } => {
            let emptied = nodes
                .nodes
                .with(node_id, |n| n.layers.with_mut(layer_id, |l| l.lifecycle.on_destroy_ack(session_id)))
                .flatten()
                .unwrap_or(false);
            if emptied {
                try_reclaim_layer(nodes, node_id, layer_id);
            }
        }
    }
}

fn send_node_destroy_now(nodes: &NodeStore, sessions: &SessionStore, node_id: crate::node::NodeId, session_id: SessionId) {
    let sent = nodes.nodes.with_mut(node_id, |n| n.lifecycle.try_send_destroy(session_id)).unwrap_or(false);
    if sent {
        let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(session_id)).flatten().unwrap_or(DEFAULT_PRIORITY);
        subscription::send(sessions, session_id, priority, Command::Node(NodeCmd::Destroy { node_id }));
    }
    try_reclaim_node(nodes, node_id);
}

fn send_taggroup_destroy_now(nodes: &NodeStore, sessions: &SessionStore, node_id: crate::node::NodeId, tg_id: verse_domain::ids::TagGroupId, session_id: SessionId) {
    let sent = nodes
        .nodes
        .with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.lifecycle.try_send_destroy(session_id)))
        .flatten()
        .unwrap_or(false);
    if sent {
        subscription::send(sessions, session_id, DEFAULT_PRIORITY, Command::TagGroup(TagGroupCmd { node_id, op: TagGroupOp::Destroy { tg_id } }));
    }
    try_reclaim_taggroup(nodes, node_id, tg_id);
}

fn send_tag_destroy_now(
    nodes: &NodeStore,
    sessions: &SessionStore,
    node_id: crate::node::NodeId,
    tg_id: verse_domain::ids::TagGroupId,
    tag_id: verse_domain::ids::TagId,
    session_id: SessionId,
) {
    let sent = nodes
        .nodes
        .with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.with_mut(tag_id, |t| t.lifecycle.try_send_destroy(session_id))))
        .flatten()
        .flatten()
        .unwrap_or(false);
    if sent {
        subscription::send(sessions, session_id, DEFAULT_PRIORITY, Command::Tag(TagCmd { node_id, tg_id, op: TagOp::Destroy { tag_id } }));
    }
    try_reclaim_tag(nodes, node_id, tg_id, tag_id);
}

fn send_layer_destroy_now(nodes: &NodeStore, sessions: &SessionStore, node_id: crate::node::NodeId, layer_id: verse_domain::ids::LayerId, session_id: SessionId) {
    let sent = nodes
        .nodes
        .with(node_id, |n| n.layers.with_mut(layer_id, |l| l.lifecycle.try_send_destroy(session_id)))
        .flatten()
        .unwrap_or(false);
    if sent {
        subscription::send(sessions, session_id, DEFAULT_PRIORITY, Command::Layer(LayerCmd { node_id, op: LayerOp::Destroy { layer_id } }));
    }
    try_reclaim_layer(nodes, node_id, layer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::config::FlowControlMode;
    use verse_domain::ids::NodeId;
    use verse_domain::types::PermissionMask;
    use verse_domain::user::SUPER_USER_UID;
    fn fresh() -> (NodeStore, SessionStore) {
        let nodes = NodeStore::new();
        crate::bootstrap::bootstrap(&nodes, &[]);
        let sessions = SessionStore::new(64, FlowControlMode::DropOldest);
        (nodes, sessions)
    }

    #[test]
    fn deferred_destroy_fires_once_create_is_acked() {
        let (nodes, sessions) = fresh();
        let a = sessions.register(SUPER_USER_UID).id;
        nodes.nodes.with_mut(NodeId::ROOT, |n| n.acl.set_perm(SUPER_USER_UID, PermissionMask::READ | PermissionMask::WRITE));
        subscription::subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);

        crate::handlers::dispatch(
            &nodes,
            &sessions,
            a,
            Command::Node(NodeCmd::Create { parent_id: NodeId::ROOT, owner: SUPER_USER_UID, custom_type: 1 }),
        );
        let child = nodes.nodes.with(NodeId::ROOT, |n| *n.children.last().unwrap()).unwrap();

        // destroy requested before the create has been acked: must be deferred.
        crate::handlers::dispatch(&nodes, &sessions, a, Command::Node(NodeCmd::Destroy { node_id: child }));
        let session = sessions.get(a).unwrap();
        let before: Vec<_> = std::iter::from_fn(|| session.out_queue.pop()).collect();
        assert!(!before.iter().any(|c| matches!(c, Command::Node(NodeCmd::Destroy { node_id }) if *node_id == child)));

        // the ack arrives: the deferred destroy must now be delivered.
        handle(&nodes, &sessions, a, Ack::NodeCreate { node_id: child });
        let after: Vec<_> = std::iter::from_fn(|| session.out_queue.pop()).collect();
        assert!(after.iter().any(|c| matches!(c, Command::Node(NodeCmd::Destroy { node_id }) if *node_id == child)));
    }

    #[test]
    fn node_destroy_ack_reclaims_once_followers_drain() {
        let (nodes, sessions) = fresh();
        let a = sessions.register(SUPER_USER_UID).id;
        nodes.nodes.with_mut(NodeId::ROOT, |n| n.acl.set_perm(SUPER_USER_UID, PermissionMask::READ | PermissionMask::WRITE));
        subscription::subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);
        crate::handlers::dispatch(
            &nodes,
            &sessions,
            a,
            Command::Node(NodeCmd::Create { parent_id: NodeId::ROOT, owner: SUPER_USER_UID, custom_type: 1 }),
        );
        let child = nodes.nodes.with(NodeId::ROOT, |n| *n.children.last().unwrap()).unwrap();
        handle(&nodes, &sessions, a, Ack::NodeCreate { node_id: child });

        crate::handlers::dispatch(&nodes, &sessions, a, Command::Node(NodeCmd::Destroy { node_id: child }));
        assert!(nodes.nodes.contains(child));

        handle(&nodes, &sessions, a, Ack::NodeDestroy { node_id: child });
        assert!(!nodes.nodes.contains(child));
    }
}
