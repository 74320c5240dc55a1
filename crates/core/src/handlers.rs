//! Command handlers for the node, tag-group, tag and layer families:
//! validate, mutate, and broadcast.
//!
//! Every handler here runs under the dispatcher's single conceptual lock —
//! none of them block, and protocol/permission failures are dropped
//! silently with a debug-level trace rather than returned as an `Err`.
//! Reclamation (the "physical free" step of the lifecycle FSM) is shared
//! with [`crate::ack_router`], which is why the `try_reclaim_*` helpers
//! below are `pub(crate)`.

use verse_domain::ids::{ItemId, LayerId, NodeId, SessionId, TagGroupId, TagId, UserId};
use verse_domain::ids::{MAX_LAYERS_COUNT, MAX_TAGGROUPS_COUNT};
use verse_domain::trace::TraceEvent;
use verse_protocol::layer::{LayerCmd, LayerOp};
use verse_protocol::node::NodeCmd;
use verse_protocol::tag::{TagCmd, TagOp};
use verse_protocol::taggroup::{TagGroupCmd, TagGroupOp};
use verse_protocol::{layer_is_allocate, tag_is_allocate, tg_is_allocate, Command};
use verse_sessions::SessionStore;

use crate::entity::LifecycleState;
use crate::layer::Layer;
use crate::node::NodeStore;
use crate::subscribers::DEFAULT_PRIORITY as ENTITY_DEFAULT_PRIORITY;
use crate::subscription::{self, reparent, set_priority, subscribe_node, unsubscribe_node};
use crate::tag::Tag;
use crate::taggroup::TagGroup;

/// Entry point the dispatcher calls for every non-ack command it drains
/// off a session's inbound queue.
pub fn dispatch(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, cmd: Command) {
    let user_id = match sessions.get(session_id) {
        Some(s) => s.user_id,
        None => return,
    };

    match cmd {
        Command::Node(c) => handle_node(nodes, sessions, session_id, user_id, c),
        Command::TagGroup(c) => handle_taggroup(nodes, sessions, session_id, user_id, c),
        Command::Tag(c) => handle_tag(nodes, sessions, session_id, user_id, c),
        Command::Layer(c) => handle_layer(nodes, sessions, session_id, user_id, c),
        Command::Ack(a) => crate::ack_router::handle(nodes, sessions, session_id, a),
    }
}

fn dropped(opcode: &'static str, session_id: SessionId, reason: &'static str) {
    TraceEvent::CommandDropped { opcode, session_id: session_id.0, reason }.emit();
}

// ───────────────────────────── node family ─────────────────────────────

fn handle_node(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, cmd: NodeCmd) {
    match cmd {
        NodeCmd::Create { parent_id, owner, custom_type } => {
            create_node(nodes, sessions, session_id, user_id, parent_id, owner, custom_type)
        }
        NodeCmd::CreateBroadcast { .. } => {
            // Server → follower direction only; a client sending this is malformed.
            dropped("node_create_broadcast", session_id, "client may not send a broadcast command");
        }
        NodeCmd::Destroy { node_id } => destroy_node(nodes, sessions, session_id, user_id, node_id),
        NodeCmd::Subscribe { node_id, version, .. } => subscribe_node(nodes, sessions, session_id, node_id, version),
        NodeCmd::Unsubscribe { node_id } => unsubscribe_node(nodes, sessions, session_id, node_id, false),
        NodeCmd::Link { parent_id, child_id } => {
            if let Err(e) = reparent(nodes, sessions, child_id, parent_id, user_id) {
                tracing::debug!(child_id = %child_id, parent_id = %parent_id, error = %e, "node_link rejected");
            }
        }
        NodeCmd::Perm { node_id, user_id: target, mask } => set_perm(nodes, sessions, session_id, user_id, node_id, target, mask),
        NodeCmd::Owner { node_id, owner } => set_owner(nodes, sessions, session_id, user_id, node_id, owner),
        NodeCmd::Lock { node_id } => lock_node(nodes, sessions, session_id, user_id, node_id),
        NodeCmd::Unlock { node_id } => unlock_node(nodes, sessions, session_id, node_id),
        NodeCmd::Prio { node_id, prio } => set_priority(nodes, session_id, node_id, prio),
    }
}

fn create_node(
    nodes: &NodeStore,
    sessions: &SessionStore,
    session_id: SessionId,
    user_id: UserId,
    parent_id: NodeId,
    owner: UserId,
    custom_type: u16,
) {
    let can_write = nodes.nodes.with(parent_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("node_create", session_id, "no write permission on parent");
        return;
    }

    let node_id = match nodes.create(parent_id, owner, custom_type) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(parent_id = %parent_id, error = %e, "node_create failed");
            return;
        }
    };
    TraceEvent::EntityCreated { kind: "node", id: node_id.0, node_id: parent_id.0 }.emit();

    // Every current subscriber of the parent immediately becomes a
    // follower of the new child — a subtree subscription fans out to a
    // child that shows up after the subscribe happened just the same as
    // one that already existed.
    let parent_subs = nodes.nodes.with(parent_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in parent_subs {
        let priority = nodes.nodes.with(parent_id, |n| n.subscribers.priority_of(sub)).flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send_node_create(nodes, sessions, sub, node_id, priority);
    }
}

fn destroy_node(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("node_destroy", session_id, "no write permission");
        return;
    }
    request_node_destroy(nodes, sessions, node_id);
}

/// Shared by the `node_destroy` handler and the session-disconnect hook's
/// avatar teardown — the latter has no requesting session to
/// permission-check against, so permission checks stay the caller's job.
pub(crate) fn request_node_destroy(nodes: &NodeStore, sessions: &SessionStore, node_id: NodeId) {
    let has_children = nodes.nodes.with(node_id, |n| !n.children.is_empty()).unwrap_or(true);
    if has_children {
        tracing::debug!(node_id = %node_id, "node_destroy refused: node has live children");
        return;
    }
    nodes.nodes.with_mut(node_id, |n| n.lifecycle.on_destroy_requested());
    drain_node_destroys(nodes, sessions, node_id);
}

fn drain_node_destroys(nodes: &NodeStore, sessions: &SessionStore, node_id: NodeId) {
    let followers = nodes.nodes.with(node_id, |n| n.lifecycle.followers()).unwrap_or_default();
    for session_id in followers {
        let sent = nodes.nodes.with_mut(node_id, |n| n.lifecycle.try_send_destroy(session_id)).unwrap_or(false);
        if sent {
            let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(session_id)).flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
            subscription::send(sessions, session_id, priority, Command::Node(NodeCmd::Destroy { node_id }));
            TraceEvent::FollowerDestroySent { kind: "node", id: node_id.0, session_id: session_id.0 }.emit();
        }
    }
    try_reclaim_node(nodes, node_id);
}

pub(crate) fn try_reclaim_node(nodes: &NodeStore, node_id: NodeId) {
    let deleted = nodes.nodes.with(node_id, |n| n.lifecycle.state() == LifecycleState::Deleted).unwrap_or(false);
    if deleted && nodes.destroy(node_id).is_ok() {
        TraceEvent::EntityReclaimed { kind: "node", id: node_id.0 }.emit();
    }
}

fn set_perm(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, target: UserId, mask: verse_domain::types::PermissionMask) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("node_perm", session_id, "no write permission");
        return;
    }
    nodes.nodes.with_mut(node_id, |n| n.acl.set_perm(target, mask));
    let subs = nodes.nodes.with(node_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in subs {
        let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(sub)).flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(sessions, sub, priority, Command::Node(NodeCmd::Perm { node_id, user_id: target, mask }));
    }
}

fn set_owner(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, new_owner: UserId) {
    let is_owner = nodes.nodes.with(node_id, |n| n.acl.owner() == user_id).unwrap_or(false);
    if !is_owner {
        dropped("node_owner", session_id, "only the current owner may transfer ownership");
        return;
    }
    nodes.nodes.with_mut(node_id, |n| n.acl.set_owner(new_owner));
    let subs = nodes.nodes.with(node_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in subs {
        let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(sub)).flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(sessions, sub, priority, Command::Node(NodeCmd::Owner { node_id, owner: new_owner }));
    }
}

fn lock_node(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("node_lock", session_id, "no write permission");
        return;
    }
    let acquired = nodes
        .nodes
        .with_mut(node_id, |n| {
            if n.lock_holder.is_none() {
                n.lock_holder = Some(session_id);
                true
            } else {
                n.lock_holder == Some(session_id)
            }
        })
        .unwrap_or(false);
    if !acquired {
        dropped("node_lock", session_id, "node already locked by another session");
        return;
    }
    broadcast_lock_state(nodes, sessions, node_id, true);
    TraceEvent::NodeLocked { node_id: node_id.0, session_id: session_id.0 }.emit();
}

fn unlock_node(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, node_id: NodeId) {
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
        dropped("node_unlock", session_id, "session does not hold the lock");
        return;
    }
    broadcast_lock_state(nodes, sessions, node_id, false);
    TraceEvent::NodeUnlocked { node_id: node_id.0, session_id: session_id.0 }.emit();
}

fn broadcast_lock_state(nodes: &NodeStore, sessions: &SessionStore, node_id: NodeId, locked: bool) {
    let subs = nodes.nodes.with(node_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in subs {
        let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(sub)).flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        let cmd = if locked { NodeCmd::Lock { node_id } } else { NodeCmd::Unlock { node_id } };
        subscription::send(sessions, sub, priority, Command::Node(cmd));
    }
}

// ─────────────────────────── tag-group family ───────────────────────────

fn handle_taggroup(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, cmd: TagGroupCmd) {
    let node_id = cmd.node_id;
    match cmd.op {
        TagGroupOp::Create { tg_id, custom_type } => create_taggroup(nodes, sessions, session_id, user_id, node_id, tg_id, custom_type),
        TagGroupOp::Destroy { tg_id } => destroy_taggroup(nodes, sessions, session_id, user_id, node_id, tg_id),
        TagGroupOp::Subscribe { tg_id } => {
            subscription::subscribe_taggroup(nodes, sessions, session_id, node_id, tg_id);
        }
        TagGroupOp::Unsubscribe { tg_id } => subscription::unsubscribe_taggroup(nodes, session_id, node_id, tg_id),
    }
}

fn create_taggroup(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, tg_id: TagGroupId, custom_type: u16) {
    if !tg_is_allocate(tg_id) {
        dropped("taggroup_create", session_id, "client-supplied tag-group id, expected allocate sentinel");
        return;
    }
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("taggroup_create", session_id, "no write permission on node");
        return;
    }

    let outcome = nodes.nodes.with_mut(node_id, |n| {
        if n.tag_groups.count() >= MAX_TAGGROUPS_COUNT {
            return None;
        }
        if n.has_taggroup_custom_type(custom_type) {
            return None;
        }
        n.next_tag_group_id()
    }).flatten();

    let Some(new_id) = outcome else {
        dropped("taggroup_create", session_id, "duplicate custom_type or tag-group ceiling reached");
        return;
    };

    nodes.nodes.with_mut(node_id, |n| n.tag_groups.add(TagGroup::new(new_id, custom_type)));
    TraceEvent::EntityCreated { kind: "taggroup", id: new_id.0 as u32, node_id: node_id.0 }.emit();

    let subs = nodes.nodes.with(node_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in subs {
        let can_read = sessions.get(sub).map(|s| nodes.nodes.with(node_id, |n| n.acl.can_read(s.user_id)).unwrap_or(false)).unwrap_or(false);
        if !can_read {
            continue;
        }
        let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(sub)).flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(sessions, sub, priority, Command::TagGroup(TagGroupCmd { node_id, op: TagGroupOp::Create { tg_id: new_id, custom_type } }));
        nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(new_id, |tg| tg.lifecycle.on_send_create_succeeded(sub)));
    }
}

fn destroy_taggroup(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, tg_id: TagGroupId) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("taggroup_destroy", session_id, "no write permission");
        return;
    }
    let exists = nodes.nodes.with(node_id, |n| n.tag_groups.contains(tg_id)).unwrap_or(false);
    if !exists {
        return;
    }
    nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.lifecycle.on_destroy_requested()));

    let followers = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.lifecycle.followers())).flatten().unwrap_or_default();
    for follower in followers {
        let sent = nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.lifecycle.try_send_destroy(follower))).flatten().unwrap_or(false);
        if sent {
            subscription::send(sessions, follower, ENTITY_DEFAULT_PRIORITY, Command::TagGroup(TagGroupCmd { node_id, op: TagGroupOp::Destroy { tg_id } }));
            TraceEvent::FollowerDestroySent { kind: "taggroup", id: tg_id.0 as u32, session_id: follower.0 }.emit();
        }
    }
    try_reclaim_taggroup(nodes, node_id, tg_id);
}

pub(crate) fn try_reclaim_taggroup(nodes: &NodeStore, node_id: NodeId, tg_id: TagGroupId) {
    let deleted = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.lifecycle.state() == LifecycleState::Deleted)).flatten().unwrap_or(false);
    if deleted {
        nodes.nodes.with_mut(node_id, |n| n.tag_groups.remove(tg_id));
        TraceEvent::EntityReclaimed { kind: "taggroup", id: tg_id.0 as u32 }.emit();
    }
}

// ──────────────────────────────── tag family ────────────────────────────

fn handle_tag(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, cmd: TagCmd) {
    let node_id = cmd.node_id;
    let tg_id = cmd.tg_id;
    match cmd.op {
        TagOp::Create { tag_id, data_type, count, custom_type } => {
            create_tag(nodes, sessions, session_id, user_id, node_id, tg_id, tag_id, data_type, count, custom_type)
        }
        TagOp::Destroy { tag_id } => destroy_tag(nodes, sessions, session_id, user_id, node_id, tg_id, tag_id),
        TagOp::Set { tag_id, value } => set_tag(nodes, sessions, session_id, user_id, node_id, tg_id, tag_id, value),
    }
}

fn create_tag(
    nodes: &NodeStore,
    sessions: &SessionStore,
    session_id: SessionId,
    user_id: UserId,
    node_id: NodeId,
    tg_id: TagGroupId,
    tag_id: TagId,
    data_type: verse_domain::types::DataType,
    count: u8,
    custom_type: u16,
) {
    if !tag_is_allocate(tag_id) {
        dropped("tag_create", session_id, "client-supplied tag id, expected allocate sentinel");
        return;
    }
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("tag_create", session_id, "no write permission on node");
        return;
    }

    let new_id = nodes
        .nodes
        .with(node_id, |n| {
            n.tag_groups.with_mut(tg_id, |tg| {
                if tg.has_custom_type(custom_type) {
                    None
                } else {
                    tg.next_tag_id()
                }
            })
        })
        .flatten()
        .flatten();

    let Some(new_id) = new_id else {
        dropped("tag_create", session_id, "duplicate custom_type or tag group missing");
        return;
    };

    nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.add(Tag::new(new_id, data_type, count, custom_type))));
    TraceEvent::EntityCreated { kind: "tag", id: new_id.0 as u32, node_id: node_id.0 }.emit();

    let subs = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.subscribers.sessions())).flatten().unwrap_or_default();
    for sub in subs {
        let priority = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.subscribers.priority_of(sub))).flatten().flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(sessions, sub, priority, Command::Tag(TagCmd { node_id, tg_id, op: TagOp::Create { tag_id: new_id, data_type, count, custom_type } }));
        nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.with_mut(new_id, |t| t.lifecycle.on_send_create_succeeded(sub))));
    }
}

fn destroy_tag(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, tg_id: TagGroupId, tag_id: TagId) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("tag_destroy", session_id, "no write permission");
        return;
    }
    let exists = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.tags.contains(tag_id))).flatten().unwrap_or(false);
    if !exists {
        return;
    }
    nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.with_mut(tag_id, |t| t.lifecycle.on_destroy_requested())));

    let followers = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.tags.with(tag_id, |t| t.lifecycle.followers()))).flatten().flatten().unwrap_or_default();
    for follower in followers {
        let sent = nodes
            .nodes
            .with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.with_mut(tag_id, |t| t.lifecycle.try_send_destroy(follower))))
            .flatten()
            .flatten()
            .unwrap_or(false);
        if sent {
            subscription::send(sessions, follower, ENTITY_DEFAULT_PRIORITY, Command::Tag(TagCmd { node_id, tg_id, op: TagOp::Destroy { tag_id } }));
            TraceEvent::FollowerDestroySent { kind: "tag", id: tag_id.0 as u32, session_id: follower.0 }.emit();
        }
    }
    try_reclaim_tag(nodes, node_id, tg_id, tag_id);
}

pub(crate) fn try_reclaim_tag(nodes: &NodeStore, node_id: NodeId, tg_id: TagGroupId, tag_id: TagId) {
    let deleted = nodes
        .nodes
        .with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.tags.with(tag_id, |t| t.lifecycle.state() == LifecycleState::Deleted)))
        .flatten()
        .flatten()
        .unwrap_or(false);
    if deleted {
        nodes.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.tags.remove(tag_id)));
        TraceEvent::EntityReclaimed { kind: "tag", id: tag_id.0 as u32 }.emit();
    }
}

fn set_tag(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, tg_id: TagGroupId, tag_id: TagId, value: verse_domain::types::Value) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("tag_set", session_id, "no write permission");
        return;
    }
    let schema = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.tags.with(tag_id, |t| (t.data_type, t.count)))).flatten().flatten();
    let Some((data_type, count)) = schema else {
        dropped("tag_set", session_id, "unknown tag");
        return;
    };
    if !value.matches_schema(data_type, count) {
        dropped("tag_set", session_id, "value does not match tag schema");
        return;
    }

    nodes.nodes.with(node_id, |n| {
        n.tag_groups.with_mut(tg_id, |tg| {
            tg.tags.with_mut(tag_id, |t| t.set_value(value.clone()));
            tg.bump_version();
        })
    });

    // Broadcast immediately to every follower already CREATED; a follower
    // still CREATING receives this same value once when its `tag_create`
    // ack arrives, handled in `ack_router`.
    let created_followers = nodes
        .nodes
        .with(node_id, |n| {
            n.tag_groups.with(tg_id, |tg| {
                tg.tags.with(tag_id, |t| {
                    t.lifecycle
                        .followers()
                        .into_iter()
                        .filter(|f| t.lifecycle.follower_state(*f) == Some(LifecycleState::Created))
                        .collect::<Vec<_>>()
                })
            })
        })
        .flatten()
        .flatten()
        .unwrap_or_default();

    for follower in created_followers {
        let priority = nodes.nodes.with(node_id, |n| n.tag_groups.with(tg_id, |tg| tg.subscribers.priority_of(follower))).flatten().flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(sessions, follower, priority, Command::Tag(TagCmd { node_id, tg_id, op: TagOp::Set { tag_id, value: value.clone() } }));
    }
}

// ─────────────────────────────── layer family ───────────────────────────

fn handle_layer(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, cmd: LayerCmd) {
    let node_id = cmd.node_id;
    match cmd.op {
        LayerOp::Create { layer_id, parent_layer_id, data_type, num_vec_comp, custom_type } => {
            create_layer(nodes, sessions, session_id, user_id, node_id, layer_id, parent_layer_id, data_type, num_vec_comp, custom_type)
        }
        LayerOp::Destroy { layer_id } => destroy_layer(nodes, sessions, session_id, user_id, node_id, layer_id),
        LayerOp::Subscribe { layer_id } => {
            subscription::subscribe_layer(nodes, sessions, session_id, node_id, layer_id);
        }
        LayerOp::Unsubscribe { layer_id } => subscription::unsubscribe_layer(nodes, session_id, node_id, layer_id),
        LayerOp::SetValue { layer_id, item_id, value } => set_layer_value(nodes, sessions, session_id, user_id, node_id, layer_id, item_id, value),
        LayerOp::UnsetValue { layer_id, item_id } => unset_layer_value(nodes, sessions, session_id, user_id, node_id, layer_id, item_id),
    }
}

#[allow(clippy::too_many_arguments)]
fn create_layer(
    nodes: &NodeStore,
    sessions: &SessionStore,
    session_id: SessionId,
    user_id: UserId,
    node_id: NodeId,
    layer_id: LayerId,
    parent_layer_id: LayerId,
    data_type: verse_domain::types::DataType,
    num_vec_comp: u8,
    custom_type: u16,
) {
    if !layer_is_allocate(layer_id) {
        dropped("layer_create", session_id, "client-supplied layer id, expected allocate sentinel");
        return;
    }
    if !data_type.valid_for_layer() {
        dropped("layer_create", session_id, "string8 is not a valid layer component type");
        return;
    }
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("layer_create", session_id, "no write permission on node");
        return;
    }

    let parent = if layer_is_allocate(parent_layer_id) { None } else { Some(parent_layer_id) };
    if let Some(parent_id) = parent {
        let parent_exists = nodes.nodes.with(node_id, |n| n.layers.contains(parent_id)).unwrap_or(false);
        if !parent_exists {
            dropped("layer_create", session_id, "parent layer does not exist in this node");
            return;
        }
    }

    let new_id = nodes.nodes.with_mut(node_id, |n| {
        if n.layers.count() >= MAX_LAYERS_COUNT {
            return None;
        }
        if n.has_layer_custom_type(custom_type) {
            return None;
        }
        n.next_layer_id()
    }).flatten();

    let Some(new_id) = new_id else {
        dropped("layer_create", session_id, "duplicate custom_type or layer ceiling reached");
        return;
    };

    nodes.nodes.with_mut(node_id, |n| n.layers.add(Layer::new(new_id, parent, data_type, num_vec_comp, custom_type)));
    if let Some(parent_id) = parent {
        nodes.nodes.with(node_id, |n| n.layers.with_mut(parent_id, |l| l.children.push(new_id)));
    }
    TraceEvent::EntityCreated { kind: "layer", id: new_id.0 as u32, node_id: node_id.0 }.emit();

    let subs = nodes.nodes.with(node_id, |n| n.subscribers.sessions()).unwrap_or_default();
    for sub in subs {
        let can_read = sessions.get(sub).map(|s| nodes.nodes.with(node_id, |n| n.acl.can_read(s.user_id)).unwrap_or(false)).unwrap_or(false);
        if !can_read {
            continue;
        }
        let priority = nodes.nodes.with(node_id, |n| n.subscribers.priority_of(sub)).flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(
            sessions,
            sub,
            priority,
            Command::Layer(LayerCmd { node_id, op: LayerOp::Create { layer_id: new_id, parent_layer_id, data_type, num_vec_comp, custom_type } }),
        );
        nodes.nodes.with(node_id, |n| n.layers.with_mut(new_id, |l| l.lifecycle.on_send_create_succeeded(sub)));
    }
}

fn destroy_layer(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, layer_id: LayerId) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("layer_destroy", session_id, "no write permission");
        return;
    }
    destroy_layer_recursive(nodes, sessions, node_id, layer_id);
}

/// Depth-first: destroy every descendant layer before the layer itself.
fn destroy_layer_recursive(nodes: &NodeStore, sessions: &SessionStore, node_id: NodeId, layer_id: LayerId) {
    let children = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.children.clone())).flatten().unwrap_or_default();
    for child_id in children {
        destroy_layer_recursive(nodes, sessions, node_id, child_id);
    }

    let exists = nodes.nodes.with(node_id, |n| n.layers.contains(layer_id)).unwrap_or(false);
    if !exists {
        return;
    }
    nodes.nodes.with(node_id, |n| n.layers.with_mut(layer_id, |l| l.lifecycle.on_destroy_requested()));

    let followers = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.lifecycle.followers())).flatten().unwrap_or_default();
    for follower in followers {
        let sent = nodes.nodes.with(node_id, |n| n.layers.with_mut(layer_id, |l| l.lifecycle.try_send_destroy(follower))).flatten().unwrap_or(false);
        if sent {
            subscription::send(sessions, follower, ENTITY_DEFAULT_PRIORITY, Command::Layer(LayerCmd { node_id, op: LayerOp::Destroy { layer_id } }));
            TraceEvent::FollowerDestroySent { kind: "layer", id: layer_id.0 as u32, session_id: follower.0 }.emit();
        }
    }
    try_reclaim_layer(nodes, node_id, layer_id);
}

pub(crate) fn try_reclaim_layer(nodes: &NodeStore, node_id: NodeId, layer_id: LayerId) {
    let deleted = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.lifecycle.state() == LifecycleState::Deleted)).flatten().unwrap_or(false);
    if deleted {
        let parent = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.parent)).flatten().flatten();
        nodes.nodes.with_mut(node_id, |n| n.layers.remove(layer_id));
        if let Some(parent_id) = parent {
            nodes.nodes.with(node_id, |n| n.layers.with_mut(parent_id, |l| l.children.retain(|c| *c != layer_id)));
        }
        TraceEvent::EntityReclaimed { kind: "layer", id: layer_id.0 as u32 }.emit();
    }
}

fn set_layer_value(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, layer_id: LayerId, item_id: ItemId, value: verse_domain::types::Value) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("layer_set_value", session_id, "no write permission");
        return;
    }
    let schema = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| (l.data_type, l.num_vec_comp))).flatten();
    let Some((data_type, num_vec_comp)) = schema else {
        dropped("layer_set_value", session_id, "unknown layer");
        return;
    };
    if !value.matches_schema(data_type, num_vec_comp) {
        dropped("layer_set_value", session_id, "value does not match layer schema");
        return;
    }

    nodes.nodes.with(node_id, |n| n.layers.with_mut(layer_id, |l| l.set_value(item_id, value.clone())));

    let subs = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.subscribers.sessions())).flatten().unwrap_or_default();
    for sub in subs {
        let priority = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.subscribers.priority_of(sub))).flatten().flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(sessions, sub, priority, Command::Layer(LayerCmd { node_id, op: LayerOp::SetValue { layer_id, item_id, value: value.clone() } }));
    }
}

fn unset_layer_value(nodes: &NodeStore, sessions: &SessionStore, session_id: SessionId, user_id: UserId, node_id: NodeId, layer_id: LayerId, item_id: ItemId) {
    let can_write = nodes.nodes.with(node_id, |n| n.acl.can_write(user_id)).unwrap_or(false);
    if !can_write {
        dropped("layer_unset_value", session_id, "no write permission");
        return;
    }
    let removed = nodes.nodes.with(node_id, |n| n.layers.with_mut(layer_id, |l| l.unset_local(item_id))).flatten().unwrap_or(false);
    if !removed {
        return;
    }

    let subs = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.subscribers.sessions())).flatten().unwrap_or_default();
    for sub in subs {
        let priority = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.subscribers.priority_of(sub))).flatten().flatten().unwrap_or(ENTITY_DEFAULT_PRIORITY);
        subscription::send(sessions, sub, priority, Command::Layer(LayerCmd { node_id, op: LayerOp::UnsetValue { layer_id, item_id } }));
    }

    // Cascade into every descendant layer without announcing it — clients
    // derive the cascade locally from the parent unset.
    let children = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.children.clone())).flatten().unwrap_or_default();
    for child_id in children {
        cascade_unset(nodes, node_id, child_id, item_id);
    }
}

fn cascade_unset(nodes: &NodeStore, node_id: NodeId, layer_id: LayerId, item_id: ItemId) {
    nodes.nodes.with(node_id, |n| n.layers.with_mut(layer_id, |l| l.unset_local(item_id)));
    let children = nodes.nodes.with(node_id, |n| n.layers.with(layer_id, |l| l.children.clone())).flatten().unwrap_or_default();
    for child_id in children {
        cascade_unset(nodes, node_id, child_id, item_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::config::FlowControlMode;
    use verse_domain::types::{Component, DataType, PermissionMask, Value};
    use verse_domain::user::SUPER_USER_UID;
    use verse_protocol::ack::Ack;
    use verse_protocol::ALLOCATE_ID_U16;

    fn fresh() -> (NodeStore, SessionStore) {
        let nodes = NodeStore::new();
        crate::bootstrap::bootstrap(&nodes, &[]);
        let sessions = SessionStore::new(64, FlowControlMode::DropOldest);
        (nodes, sessions)
    }

    fn grant_full(nodes: &NodeStore, node_id: NodeId, user: UserId) {
        nodes.nodes.with_mut(node_id, |n| n.acl.set_perm(user, PermissionMask::READ | PermissionMask::WRITE));
    }

    #[test]
    fn create_node_notifies_existing_parent_subscribers() {
        let (nodes, sessions) = fresh();
        let a = sessions.register(SUPER_USER_UID).id;
        subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);

        dispatch(&nodes, &sessions, a, Command::Node(NodeCmd::Create { parent_id: NodeId::ROOT, owner: SUPER_USER_UID, custom_type: 7 }));

        let session = sessions.get(a).unwrap();
        let drained: Vec<_> = std::iter::from_fn(|| session.out_queue.pop()).collect();
        assert!(drained.iter().any(|c| matches!(c, Command::Node(NodeCmd::CreateBroadcast { custom_type: 7, .. }))));
    }

    #[test]
    fn destroy_refused_while_children_present() {
        let (nodes, sessions) = fresh();
        let owner = sessions.register(SUPER_USER_UID).id;
        let child = nodes.create(NodeId::ROOT, SUPER_USER_UID, 0).unwrap();
        let _grandchild = nodes.create(child, SUPER_USER_UID, 0).unwrap();
        destroy_node(&nodes, &sessions, owner, SUPER_USER_UID, child);
        assert!(nodes.nodes.contains(child));
    }

    #[test]
    fn taggroup_create_rejects_duplicate_custom_type() {
        let (nodes, sessions) = fresh();
        let a = sessions.register(SUPER_USER_UID).id;
        create_taggroup(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, TagGroupId(ALLOCATE_ID_U16), 5);
        create_taggroup(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, TagGroupId(ALLOCATE_ID_U16), 5);
        let count = nodes.nodes.with(NodeId::ROOT, |n| n.tag_groups.count()).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn tag_set_during_creation_delivers_before_created_ack() {
        let (nodes, sessions) = fresh();
        let a = sessions.register(SUPER_USER_UID).id;
        subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);
        create_taggroup(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, TagGroupId(ALLOCATE_ID_U16), 1);
        let tg_id = nodes.nodes.with(NodeId::ROOT, |n| n.tag_groups.keys()[0]).unwrap();
        // ack the tag group's create so the subscriber can subscribe to it.
        crate::ack_router::handle(&nodes, &sessions, a, Ack::TagGroupCreate { node_id: NodeId::ROOT, tg_id });
        subscription::subscribe_taggroup(&nodes, &sessions, a, NodeId::ROOT, tg_id);

        create_tag(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, tg_id, TagId(ALLOCATE_ID_U16), DataType::U32, 1, 9);
        let tag_id = nodes.nodes.with(NodeId::ROOT, |n| n.tag_groups.with(tg_id, |tg| tg.tags.keys()[0])).flatten().unwrap();

        set_tag(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, tg_id, tag_id, Value::Vector(vec![Component::U32(42)]));

        // follower is still Creating for the tag, so the ack should deliver the value.
        crate::ack_router::handle(&nodes, &sessions, a, Ack::TagCreate { node_id: NodeId::ROOT, tg_id, tag_id });

        let session = sessions.get(a).unwrap();
        let drained: Vec<_> = std::iter::from_fn(|| session.out_queue.pop()).collect();
        assert!(drained.iter().any(|c| matches!(c, Command::Tag(TagCmd { op: TagOp::Set { value, .. }, .. }) if *value == Value::Vector(vec![Component::U32(42)]))));
    }

    #[test]
    fn layer_unset_cascades_without_announcing_descendant() {
        let (nodes, sessions) = fresh();
        let a = sessions.register(SUPER_USER_UID).id;
        subscribe_node(&nodes, &sessions, a, NodeId::ROOT, 0);

        create_layer(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, LayerId(ALLOCATE_ID_U16), LayerId(ALLOCATE_ID_U16), DataType::U8, 1, 1);
        let l_id = nodes.nodes.with(NodeId::ROOT, |n| n.layers.keys()[0]).unwrap();
        create_layer(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, LayerId(ALLOCATE_ID_U16), l_id, DataType::U8, 1, 2);
        let m_id = *nodes.nodes.with(NodeId::ROOT, |n| n.layers.keys()).unwrap().iter().find(|id| **id != l_id).unwrap();

        nodes.nodes.with(NodeId::ROOT, |n| n.layers.with_mut(l_id, |l| l.set_value(ItemId(7), Value::Vector(vec![Component::U8(1)]))));
        nodes.nodes.with(NodeId::ROOT, |n| n.layers.with_mut(m_id, |l| l.set_value(ItemId(7), Value::Vector(vec![Component::U8(1)]))));

        unset_layer_value(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT, l_id, ItemId(7));

        let still_present = nodes.nodes.with(NodeId::ROOT, |n| n.layers.with(m_id, |l| l.values.contains(ItemId(7)))).flatten().unwrap();
        assert!(!still_present);

        let session = sessions.get(a).unwrap();
        let drained: Vec<_> = std::iter::from_fn(|| session.out_queue.pop()).collect();
        let unsets = drained.iter().filter(|c| matches!(c, Command::Layer(LayerCmd { op: LayerOp::UnsetValue { .. }, .. }))).count();
        assert_eq!(unsets, 1);
    }

    #[test]
    fn lock_then_unlock_round_trips() {
        let (nodes, sessions) = fresh();
        let a = sessions.register(SUPER_USER_UID).id;
        grant_full(&nodes, NodeId::ROOT, SUPER_USER_UID);
        lock_node(&nodes, &sessions, a, SUPER_USER_UID, NodeId::ROOT);
        assert_eq!(nodes.nodes.with(NodeId::ROOT, |n| n.lock_holder).unwrap(), Some(a));
        unlock_node(&nodes, &sessions, a, NodeId::ROOT);
        assert_eq!(nodes.nodes.with(NodeId::ROOT, |n| n.lock_holder).unwrap(), None);
    }
}
