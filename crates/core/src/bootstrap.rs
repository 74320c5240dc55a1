//! Well-known-node bootstrap.
//!
//! Builds the four fixed-id system nodes and one node per known user,
//! already in the `Created` lifecycle state, so the graph has a stable
//! skeleton before any session connects.

use verse_domain::ids::{NodeId, TagGroupId, TagId};
use verse_domain::types::{DataType, Value};
use verse_domain::user::{User, SUPER_USER_UID};

use crate::node::{Node, NodeStore};
use crate::taggroup::TagGroup;
use crate::tag::Tag;

/// `custom_type` stamped on every per-user node's name tag group, purely a
/// local convention — the wire format treats it as an opaque value.
const USER_NAME_TAG_GROUP_TYPE: u16 = 0;
const USER_NAME_TAG_TYPE: u16 = 0;

/// The outcome of [`bootstrap`].
pub struct Bootstrap {
    pub users_attached: usize,
}

/// Build the four-node system skeleton (root, avatar-parent, user-parent,
/// scene-parent) plus one node per `users`, attaching them to the store.
/// Idempotent only in the sense that it assumes an empty store — callers
/// restoring from persistence skip this, or call it first as the fallback
/// when restore comes up empty.
pub fn bootstrap(store: &NodeStore, users: &[User]) -> Bootstrap {
    let mut root = Node::new(NodeId::ROOT, None, SUPER_USER_UID, 0, 0);
    root.lifecycle = crate::entity::Lifecycle::new_created();
    store.insert_raw(root);

    for id in [NodeId::AVATAR_PARENT, NodeId::USER_PARENT, NodeId::SCENE_PARENT] {
        let mut node = Node::new(id, Some(NodeId::ROOT), SUPER_USER_UID, 0, 1);
        node.lifecycle = crate::entity::Lifecycle::new_created();
        store.insert_raw(node);
    }

    let mut users_attached = 0;
    for user in users {
        if user.is_fake() {
            continue;
        }
        let node_id = user.user_id.as_node_id();
        let mut node = Node::new(node_id, Some(NodeId::USER_PARENT), SUPER_USER_UID, 0, 2);
        node.lifecycle = crate::entity::Lifecycle::new_created();

        let tg_id = TagGroupId(0);
        let mut tg = TagGroup::new(tg_id, USER_NAME_TAG_GROUP_TYPE);
        tg.lifecycle = crate::entity::Lifecycle::new_created();

        let tag_id = TagId(0);
        let mut tag = Tag::new(tag_id, DataType::String8, 1, USER_NAME_TAG_TYPE);
        tag.lifecycle = crate::entity::Lifecycle::new_created();
        tag.set_value(Value::String8(user.realname.clone()));

        tg.tags.add(tag);
        node.tag_groups.add(tg);

        store.insert_raw(node);
        users_attached += 1;
    }

    Bootstrap { users_attached }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::ids::UserId;

    #[test]
    fn builds_four_system_nodes() {
        let store = NodeStore::new();
        bootstrap(&store, &[]);
        for id in [
            NodeId::ROOT,
            NodeId::AVATAR_PARENT,
            NodeId::USER_PARENT,
            NodeId::SCENE_PARENT,
        ] {
            assert!(store.nodes.contains(id));
        }
        let children = store.nodes.with(NodeId::ROOT, |n| n.children.clone()).unwrap();
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn attaches_one_node_per_real_user() {
        let store = NodeStore::new();
        let user = User {
            user_id: UserId(1000),
            username: "alice".into(),
            realname: "Alice Example".into(),
            credential: String::new(),
        };
        let result = bootstrap(&store, std::slice::from_ref(&user));
        assert_eq!(result.users_attached, 1);
        let node_id = user.user_id.as_node_id();
        assert!(store.nodes.contains(node_id));
        let tag_value = store
            .nodes
            .with(node_id, |n| {
                n.tag_groups
                    .with(TagGroupId(0), |tg| tg.tags.with(TagId(0), |t| t.value.clone()))
                    .flatten()
            })
            .flatten();
        assert_eq!(tag_value, Some(Value::String8("Alice Example".into())));
    }

    #[test]
    fn fake_users_are_never_attached() {
        let store = NodeStore::new();
        let result = bootstrap(&store, &[verse_domain::user::User {
            user_id: SUPER_USER_UID,
            username: "super".into(),
            realname: "Super User".into(),
            credential: String::new(),
        }]);
        assert_eq!(result.users_attached, 0);
        assert!(!store.nodes.contains(SUPER_USER_UID.as_node_id()));
    }
}
