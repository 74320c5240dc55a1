//! Subscription engine: follower/subscriber bookkeeping and the fan-out
//! a subscribe/unsubscribe triggers.
//!
//! Every function here takes the node store and session store by shared
//! reference and pushes directly onto the relevant session's outbound
//! queue — there is no separate "pending broadcast" buffer.

use std::collections::HashSet;

use verse_domain::ids::{NodeId, SessionId, TagGroupId, UserId};
use verse_protocol::node::NodeCmd;
use verse_protocol::taggroup::{TagGroupCmd, TagGroupOp};
use verse_protocol::layer::{LayerCmd, LayerOp};
use verse_protocol::Command;
use verse_sessions::SessionStore;

use crate::link::test_reparent_allowed;
use crate::node::NodeStore;
use crate::subscribers::DEFAULT_PRIORITY;
use verse_domain::{Error, Result};

pub(crate) fn send(sessions: &SessionStore, session_id: SessionId, priority: u8, cmd: Command) {
    if let Some(session) = sessions.get(session_id) {
        session.out_queue.push(priority, cmd);
    }
}

/// Send `node_create` for `node_id` to `session_id` and register it as a
/// follower, unless the session already knows about the node — a follower
/// already `Creating` or `Created` is never re-announced. Returns `true`
/// if a command was actually sent.
pub fn send_node_create(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, node_id: NodeId, priority: u8) -> bool {
    let already_follower = nodes
        .nodes
        .with(node_id, |n| n.lifecycle.is_follower(session_id))
        .unwrap_or(true);
    if already_follower {
        return false;
    }

    let sent = nodes.nodes.with(node_id, |n| {
        n.lifecycle.is_announceable().then(|| {
            (n.parent.unwrap_or(NodeId::ROOT), n.acl.owner(), n.custom_type)
        })
    }).flatten();

    let Some((parent_id, owner, custom_type)) = sent else {
        return false;
    };

    send(
        sessions,
        session_id,
        priority,
        Command::Node(NodeCmd::CreateBroadcast {
            node_id,
            parent_id,
            owner,
            custom_type,
        }),
    );
    nodes.nodes.with_mut(node_id, |n| n.lifecycle.on_send_create_succeeded(session_id));
    true
}

/// Subscribe `session_id` to `node_id`. `version` is currently only
/// honoured as `0`; any other value just logs a warning.
pub fn subscribe_node(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, node_id: NodeId, version: u8) {
    if version != 0 {
        tracing::warn!(node_id = %node_id, version, "node_subscribe with unsupported version, honouring as 0");
    }

    let precondition_ok = nodes.nodes.with(node_id, |n| n.lifecycle.is_announceable()).unwrap_or(false);
    if !precondition_ok {
        verse_domain::trace::TraceEvent::SubscribeDenied {
            node_id: node_id.0,
            session_id: session_id.0,
            reason: "node not creating or created",
        }
        .emit();
        return;
    }

    let already_subscribed = nodes.nodes.with(node_id, |n| n.subscribers.contains(session_id)).unwrap_or(true);
    if already_subscribed {
        return;
    }

    nodes.nodes.with_mut(node_id, |n| n.subscribers.add(session_id, DEFAULT_PRIORITY));

    let user_id = match sessions.get(session_id) {
        Some(s) => s.user_id,
        None => return,
    };

    // 1. node_perm advertisements, always sent regardless of read access —
    //    this is how a denied client learns why it gets nothing else.
    let (perms, locked, can_read, parent, children) = nodes
        .nodes
        .with(node_id, |n| {
            (
                n.acl.entries().to_vec(),
                n.lock_holder,
                n.acl.can_read(user_id),
                n.parent,
                n.children.clone(),
            )
        })
        .unwrap_or_default();

    for (user, mask) in perms {
        send(
            sessions,
            session_id,
            DEFAULT_PRIORITY,
            Command::Node(NodeCmd::Perm { node_id, user_id: user, mask }),
        );
    }

    if let Some(lock_session) = locked {
        let _ = lock_session;
        send(sessions, session_id, DEFAULT_PRIORITY, Command::Node(NodeCmd::Lock { node_id }));
    }

    if !can_read {
        verse_domain::trace::TraceEvent::SubscribeDenied {
            node_id: node_id.0,
            session_id: session_id.0,
            reason: "no read permission",
        }
        .emit();
        return;
    }

    // Announce the node itself to this session, unless it was already a
    // follower or the node is the tree root — root has no parent to
    // announce through, and a client subscribing to it already knows it
    // implicitly as the well-known entry point.
    if parent.is_some() {
        send_node_create(nodes, sessions, session_id, node_id, DEFAULT_PRIORITY);
    }

    // 3. node_create for each child.
    for child_id in children {
        send_node_create(nodes, sessions, session_id, child_id, DEFAULT_PRIORITY);
    }

    // 4. taggroup_create for every tag group in Creating/Created.
    let tg_ids = nodes.nodes.with(node_id, |n| n.tag_groups.keys()).unwrap_or_default();
    for tg_id in tg_ids {
        let creatable = nodes
            .nodes
            .with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.lifecycle.is_announceable()))
            .flatten()
            .unwrap_or(false);
        if creatable {
            let custom_type = nodes
                .nodes
                .with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.custom_type))
                .flatten()
                .unwrap_or(0);
            send(
                sessions,
                session_id,
                DEFAULT_PRIORITY,
                Command::TagGroup(TagGroupCmd { node_id, op: TagGroupOp::Create { tg_id, custom_type } }),
            );
        }
    }

    // 5. layer_create for every layer in Creating/Created.
    let layer_ids = nodes.nodes.with(node_id, |n| n.layers.keys()).unwrap_or_default();
    for layer_id in layer_ids {
        let info = nodes
            .nodes
            .with(node_id, |n| {
                n.layers.with(layer_id, |l| {
                    l.lifecycle.is_announceable().then(|| {
                        (l.parent.unwrap_or(verse_domain::ids::LayerId(0xFFFF)), l.data_type, l.num_vec_comp, l.custom_type)
                    })
                })
            })
            .flatten()
            .flatten();
        if let Some((parent_layer_id, data_type, num_vec_comp, custom_type)) = info {
            send(
                sessions,
                session_id,
                DEFAULT_PRIORITY,
                Command::Layer(LayerCmd {
                    node_id,
                    op: LayerOp::Create { layer_id, parent_layer_id, data_type, num_vec_comp, custom_type },
                }),
            );
        }
    }
}

/// Unsubscribe `session_id` from `node_id`. `nested` is `true` when this
/// call is itself the result of an
/// ancestor's unsubscribe recursing down (in which case the session is
/// also dropped from the node's follower list, not just its subscriber
/// list).
pub fn unsubscribe_node(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, node_id: NodeId, nested: bool) {
    let children = nodes.nodes.with(node_id, |n| n.children.clone()).unwrap_or_default();
    for child_id in children {
        let child_was_subscribed = nodes
            .nodes
            .with(child_id, |n| n.subscribers.contains(session_id))
            .unwrap_or(false);
        if child_was_subscribed {
            unsubscribe_node(nodes, sessions, session_id, child_id, true);
        }
    }

    let tg_ids = nodes.nodes.with(node_id, |n| n.tag_groups.keys()).unwrap_or_default();
    for tg_id in tg_ids {
        unsubscribe_taggroup(nodes, session_id, node_id, tg_id);
    }

    let layer_ids = nodes.nodes.with(node_id, |n| n.layers.keys()).unwrap_or_default();
    for layer_id in layer_ids {
        unsubscribe_layer(nodes, session_id, node_id, layer_id);
    }

    nodes.nodes.with_mut(node_id, |n| n.subscribers.remove(session_id));
    if nested {
        nodes.nodes.with_mut(node_id, |n| n.lifecycle.force_remove_follower(session_id));
    }
}

pub fn subscribe_taggroup(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, node_id: NodeId, tg_id: TagGroupId) -> bool {
    let node_subscribed = nodes.nodes.with(node_id, |n| n.subscribers.contains(session_id)).unwrap_or(false);
    if !node_subscribed {
        return false;
    }

    let already = nodes
        .nodes
        .with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.subscribers.contains(session_id)))
        .flatten()
        .unwrap_or(true);
    if already {
        return false;
    }

    nodes.nodes.with(node_id, |n| {
        n.tag_groups.with_mut(tg_id, |tg| {
            tg.subscribers.add(session_id, DEFAULT_PRIORITY);
        })
    });

    let tag_ids = nodes
        .nodes
        .with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.tags.keys()))
        .flatten()
        .unwrap_or_default();

    for tag_id in tag_ids {
        let info = nodes
            .nodes
            .with(node_id, |n| {
                n.tag_groups.with(tg_id, |tg| {
                    tg.tags.with(tag_id, |t| (t.lifecycle.is_announceable(), t.data_type, t.count, t.custom_type))
                })
            })
            .flatten()
            .flatten();
        if let Some((creatable, data_type, count, custom_type)) = info {
            if creatable {
                send(
                    sessions,
                    session_id,
                    DEFAULT_PRIORITY,
                    Command::Tag(verse_protocol::TagCmd {
                        node_id,
                        tg_id,
                        op: verse_protocol::tag::TagOp::Create { tag_id, data_type, count, custom_type },
                    }),
                );
                nodes.nodes.with(node_id, |n| {
                    n.tag_groups.with_mut(tg_id, |tg| {
                        tg.tags.with_mut(tag_id, |t| t.lifecycle.on_send_create_succeeded(session_id));
                    })
                });
            }
        }
    }
    true
}

pub fn unsubscribe_taggroup(nodes: &NodeStore, session_id: SessionId, node_id: NodeId, tg_id: TagGroupId) {
    nodes.nodes.with(node_id, |n| {
        n.tag_groups.with_mut(tg_id, |tg| {
            let tag_ids = tg.tags.keys();
            for tag_id in tag_ids {
                tg.tags.with_mut(tag_id, |t| {
                    t.lifecycle.force_remove_follower(session_id);
                });
            }
            tg.subscribers.remove(session_id);
        })
    });
}

pub fn subscribe_layer(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, node_id: NodeId, layer_id: verse_domain::ids::LayerId) -> bool {
    let node_subscribed = nodes.nodes.with(node_id, |n| n.subscribers.contains(session_id)).unwrap_or(false);
    if !node_subscribed {
        return false;
    }

    let already = nodes
        .nodes
        .with(node_id, |n| n.layers.with(layer_id, |l| l.subscribers.contains(session_id)))
        .flatten()
        .unwrap_or(true);
    if already {
        return false;
    }

    nodes.nodes.with(node_id, |n| {
        n.layers.with_mut(layer_id, |l| l.subscribers.add(session_id, DEFAULT_PRIORITY))
    });

    let items = nodes
        .nodes
        .with(node_id, |n| n.layers.with(layer_id, |l| l.values.values()))
        .flatten()
        .unwrap_or_default();

    for item in items {
        send(
            sessions,
            session_id,
            DEFAULT_PRIORITY,
            Command::Layer(LayerCmd {
                node_id,
                op: LayerOp::SetValue { layer_id, item_id: item.item_id, value: item.value },
            }),
        );
    }
    true
}

pub fn unsubscribe_layer(nodes: &NodeStore, session_id: SessionId, node_id: NodeId, layer_id: verse_domain::ids::LayerId) {
    nodes.nodes.with(node_id, |n| {
        n.layers.with_mut(layer_id, |l| l.subscribers.remove(session_id))
    });
}

/// `node_prio`: set this session's fan-out priority for `node_id` and
/// recursively for every descendant it is already subscribed to.
pub fn set_priority(nodes: &NodeStore, session_id: SessionId, node_id: NodeId, priority: u8) {
    let was_subscribed = nodes
        .nodes
        .with_mut(node_id, |n| {
            if n.subscribers.contains(session_id) {
                n.subscribers.set_priority(session_id, priority);
                Some(n.children.clone())
            } else {
                None
            }
        })
        .flatten();

    if let Some(children) = was_subscribed {
        for child_id in children {
            set_priority(nodes, session_id, child_id, priority);
        }
    }
}

fn recompute_levels(nodes: &NodeStore, id: NodeId, level: u32) {
    let children = nodes
        .nodes
        .with_mut(id, |n| {
            n.level = level;
            n.children.clone()
        })
        .unwrap_or_default();
    for child_id in children {
        recompute_levels(nodes, child_id, level + 1);
    }
}

/// `node_link`: move `child_id` from its current parent to `new_parent_id`.
/// Validates write access on the child, the old parent and the new
/// parent, rejects a no-op re-parent onto the same parent, and rejects
/// anything [`test_reparent_allowed`] would turn into a cycle — then
/// notifies exactly three cohorts, each session at most once: old-parent
/// subscribers who could read the old parent get `node_link`; the
/// child's pre-existing followers not already notified get `node_link`;
/// new-parent subscribers not already notified who can read the new
/// parent get a full `node_create` for the child. The dedup set is a
/// call-stack-local `HashSet<SessionId>` rather than a field on the
/// session, so concurrent re-parents never share state.
pub fn reparent(nodes: &NodeStore, sessions: &SessionStore, child_id: NodeId, new_parent_id: NodeId, requester: UserId) -> Result<()> {
    let old_parent_id = nodes
        .nodes
        .with(child_id, |n| n.parent)
        .flatten()
        .ok_or_else(|| Error::Other(format!("node {child_id} has no parent to move from")))?;

    if old_parent_id == new_parent_id {
        return Err(Error::Other("re-parent onto the same parent is a no-op".into()));
    }

    let child_live = nodes.nodes.with(child_id, |n| n.lifecycle.is_announceable()).unwrap_or(false);
    if !child_live {
        return Err(Error::Other(format!("node {child_id} is being destroyed")));
    }

    let can_write = |id: NodeId| nodes.nodes.with(id, |n| n.acl.can_write(requester)).unwrap_or(false);
    if !can_write(child_id) || !can_write(old_parent_id) || !can_write(new_parent_id) {
        return Err(Error::Other("insufficient write permission for re-parent".into()));
    }

    if !test_reparent_allowed(nodes, new_parent_id, child_id) {
        return Err(Error::Other(format!("re-parenting {child_id} under {new_parent_id} would create a cycle")));
    }

    nodes.nodes.with_mut(old_parent_id, |n| n.children.retain(|c| *c != child_id));
    nodes.nodes.with_mut(new_parent_id, |n| n.children.push(child_id));
    nodes.nodes.with_mut(child_id, |n| n.parent = Some(new_parent_id));

    let new_parent_level = nodes.nodes.with(new_parent_id, |n| n.level).unwrap_or(0);
    recompute_levels(nodes, child_id, new_parent_level + 1);

    let mut notified: HashSet<SessionId> = HashSet::new();

    let old_parent_subs = nodes.nodes.with(old_parent_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for session_id in old_parent_subs {
        let user_id = match sessions.get(session_id) {
            Some(s) => s.user_id,
            None => continue,
        };
        let can_read = nodes.nodes.with(old_parent_id, |n| n.acl.can_read(user_id)).unwrap_or(false);
        if can_read {
            send(sessions, session_id, DEFAULT_PRIORITY, Command::Node(NodeCmd::Link { parent_id: new_parent_id, child_id }));
            notified.insert(session_id);
        }
    }

    let child_followers = nodes.nodes.with(child_id, |n| n.lifecycle.followers()).unwrap_or_default();
    for session_id in child_followers {
        if notified.contains(&session_id) {
            continue;
        }
        send(sessions, session_id, DEFAULT_PRIORITY, Command::Node(NodeCmd::Link { parent_id: new_parent_id, child_id }));
        notified.insert(session_id);
    }

    let new_parent_subs = nodes.nodes.with(new_parent_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for session_id in new_parent_subs {
        if notified.contains(&session_id) {
            continue;
        }
        let user_id = match sessions.get(session_id) {
            Some(s) => s.user_id,
            None => continue,
        };
        let can_read = nodes.nodes.with(new_parent_id, |n| n.acl.can_read(user_id)).unwrap_or(false);
        if can_read {
            send_node_create(nodes, sessions, session_id, child_id, DEFAULT_PRIORITY);
            notified.insert(session_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::config::FlowControlMode;
    use verse_domain::types::PermissionMask;
    use verse_domain::user::SUPER_USER_UID;

    fn fresh() -> (NodeStore, SessionStore, SessionId) {
        let nodes = NodeStore::new();
        crate::bootstrap::bootstrap(&nodes, &[]);
        let sessions = SessionStore::new(64, FlowControlMode::DropOldest);
        let session = sessions.register(SUPER_USER_UID);
        (nodes, sessions, session.id)
    }

    #[test]
    fn subscribe_before_content_exists_then_create_notifies_exactly_once() {
        let (nodes, sessions, a) = fresh();
        subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);
        assert!(nodes.nodes.with(NodeId::ROOT, |n| n.subscribers.contains(a)).unwrap());

        let x = nodes.create(NodeId::ROOT, SUPER_USER_UID, 7).unwrap();
        send_node_create(&nodes, &sessions, a, x, DEFAULT_PRIORITY);

        let session = sessions.get(a).unwrap();
        let drained: Vec<_> = std::iter::from_fn(|| session.out_queue.pop()).collect();
        let creates = drained
            .iter()
            .filter(|c| matches!(c, Command::Node(NodeCmd::CreateBroadcast { node_id, .. }) if *node_id == x))
            .count();
        assert_eq!(creates, 1);

        // Re-sending create for the same follower is a no-op.
        assert!(!send_node_create(&nodes, &sessions, a, x, DEFAULT_PRIORITY));
    }

    #[test]
    fn denied_subscriber_gets_perm_but_nothing_else() {
        let (nodes, sessions, _owner) = fresh();
        let other = sessions.register(verse_domain::user::OTHER_USERS_UID);
        // scene-parent owner is super-user; other_users has no explicit grant.
        subscribe_node(&nodes, &sessions, other.id, NodeId::SCENE_PARENT, 0);
        let drained: Vec<_> = std::iter::from_fn(|| other.out_queue.pop()).collect();
        assert!(
            drained.iter().all(|c| matches!(c, Command::Node(NodeCmd::Perm { .. }))),
            "denied subscriber must receive only node_perm advertisements, got {drained:?}"
        );
        assert!(!drained.iter().any(|c| matches!(c, Command::Node(NodeCmd::CreateBroadcast { .. }))));
    }

    #[test]
    fn unsubscribe_removes_from_node_subs() {
        let (nodes, sessions, a) = fresh();
        subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);
        unsubscribe_node(&nodes, &sessions, a, NodeId::ROOT, false);
        assert!(!nodes.nodes.with(NodeId::ROOT, |n| n.subscribers.contains(a)).unwrap());
    }

    #[test]
    fn node_prio_recurses_into_subscribed_descendants() {
        let (nodes, sessions, a) = fresh();
        subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);
        let x = nodes.create(NodeId::ROOT, SUPER_USER_UID, 0).unwrap();
        nodes.nodes.with_mut(x, |n| n.acl.set_perm(SUPER_USER_UID, PermissionMask::READ | PermissionMask::WRITE));
        subscribe_node(&nodes, &sessions, a, x, 0);

        set_priority(&nodes, a, NodeId::ROOT, 9);
        assert_eq!(nodes.nodes.with(NodeId::ROOT, |n| n.subscribers.priority_of(a)).flatten(), Some(9));
        assert_eq!(nodes.nodes.with(x, |n| n.subscribers.priority_of(a)).flatten(), Some(9));
    }

    #[test]
    fn reparent_notifies_each_cohort_exactly_once() {
        // X is a child of P1 with subscribers {A,B}; P2 has subscribers
        // {B,C}. A re-parent onto P2 must tell A and B `node_link` exactly
        // once each, and C a fresh `node_create`.
        let (nodes, sessions, _owner) = fresh();
        for user in [UserId(1), UserId(2), UserId(3)] {
            nodes.nodes.with_mut(NodeId::ROOT, |n| n.acl.set_perm(user, PermissionMask::READ | PermissionMask::WRITE));
        }
        let p1 = nodes.create(NodeId::ROOT, SUPER_USER_UID, 0).unwrap();
        let p2 = nodes.create(NodeId::ROOT, SUPER_USER_UID, 0).unwrap();
        for parent in [p1, p2] {
            for user in [UserId(1), UserId(2), UserId(3)] {
                nodes.nodes.with_mut(parent, |n| n.acl.set_perm(user, PermissionMask::READ | PermissionMask::WRITE));
            }
        }
        let x = nodes.create(p1, SUPER_USER_UID, 0).unwrap();
        nodes.nodes.with_mut(x, |n| n.acl.set_perm(verse_domain::user::OTHER_USERS_UID, PermissionMask::READ | PermissionMask::WRITE));

        let a = sessions.register(UserId(1)).id;
        let b = sessions.register(UserId(2)).id;
        let c = sessions.register(UserId(3)).id;

        subscribe_node(&nodes, &sessions, a, p1, 0);
        subscribe_node(&nodes, &sessions, b, p1, 0);
        subscribe_node(&nodes, &sessions, b, p2, 0);
        subscribe_node(&nodes, &sessions, c, p2, 0);

        // Drain the `node_create(X)` noise subscribing to p1 produced for A/B.
        for session_id in [a, b, c] {
            let session = sessions.get(session_id).unwrap();
            while session.out_queue.pop().is_some() {}
        }

        reparent(&nodes, &sessions, x, p2, SUPER_USER_UID).unwrap();

        let link_count = |session_id: SessionId| {
            let session = sessions.get(session_id).unwrap();
            std::iter::from_fn(|| session.out_queue.pop())
                .filter(|c| matches!(c, Command::Node(NodeCmd::Link { parent_id, child_id }) if *parent_id == p2 && *child_id == x))
                .count()
        };
        let create_count = |session_id: SessionId| {
            let session = sessions.get(session_id).unwrap();
            std::iter::from_fn(|| session.out_queue.pop())
                .filter(|c| matches!(c, Command::Node(NodeCmd::CreateBroadcast { node_id, .. }) if *node_id == x))
                .count()
        };

        assert_eq!(link_count(a), 1, "A already knew X via the old parent");
        assert_eq!(link_count(b), 1, "B must not be double-notified across both cohorts");
        assert_eq!(create_count(c), 1, "C never knew X, so it gets a fresh create");
    }
}
