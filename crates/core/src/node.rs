//! Node store: global map of node id → node plus the id allocator.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use verse_domain::ids::{NodeId, UserId, FIRST_COMMON_NODE_ID, MAX_COMMON_NODE_COUNT};
use verse_domain::types::NodeFlags;

use crate::access::AccessList;
use crate::container::{HashedContainer, Keyed};
use crate::entity::Lifecycle;
use crate::layer::Layer;
use crate::subscribers::Subscribers;
use crate::taggroup::TagGroup;
use verse_domain::ids::{LayerId, TagGroupId};
use verse_domain::{Error, Result};

/// Authoritative node object.
pub struct Node {
    pub id: NodeId,
    pub custom_type: u16,
    pub acl: AccessList,
    pub parent: Option<NodeId>,
    /// Ordered child link list; order is not semantically meaningful but
    /// kept stable for deterministic test fixtures.
    pub children: Vec<NodeId>,
    pub tag_groups: HashedContainer<TagGroupId, TagGroup>,
    pub layers: HashedContainer<LayerId, Layer>,
    pub lifecycle: Lifecycle,
    /// Sessions that have subscribed to this node's interior contents;
    /// every entry here is also a follower in `lifecycle`, but not every
    /// follower is here.
    pub subscribers: Subscribers,
    pub lock_holder: Option<verse_domain::ids::SessionId>,
    pub level: u32,
    pub version: u64,
    pub saved_version: u64,
    pub crc32: u32,
    pub flags: NodeFlags,
    last_tg_id: u16,
    last_layer_id: u16,
}

impl Keyed<NodeId> for Node {
    fn key(&self) -> NodeId {
        self.id
    }
}

impl Node {
    pub fn new(id: NodeId, parent: Option<NodeId>, owner: UserId, custom_type: u16, level: u32) -> Self {
        Self {
            id,
            custom_type,
            acl: AccessList::new(owner),
            parent,
            children: Vec::new(),
            tag_groups: HashedContainer::new(),
            layers: HashedContainer::new(),
            lifecycle: Lifecycle::new(),
            subscribers: Subscribers::new(),
            lock_holder: None,
            level,
            version: 0,
            saved_version: 0,
            crc32: 0,
            flags: NodeFlags::empty(),
            last_tg_id: 0,
            last_layer_id: 0,
        }
    }

    /// Next unused tag-group id starting from `last_tg_id`, wrapping in
    /// `[0, 65534]`; `0xFFFF` stays reserved for "allocate".
    pub fn next_tag_group_id(&mut self) -> Option<TagGroupId> {
        next_id_in_node(&mut self.last_tg_id, |id| self.tag_groups.contains(TagGroupId(id)))
            .map(TagGroupId)
    }

    pub fn next_layer_id(&mut self) -> Option<LayerId> {
        next_id_in_node(&mut self.last_layer_id, |id| self.layers.contains(LayerId(id)))
            .map(LayerId)
    }

    /// `true` if a tag group with `custom_type` already exists in this
    /// node.
    pub fn has_taggroup_custom_type(&self, custom_type: u16) -> bool {
        self.tag_groups.any(|tg| tg.custom_type == custom_type)
    }

    /// `true` if a layer with `custom_type` already exists in this node.
    pub fn has_layer_custom_type(&self, custom_type: u16) -> bool {
        self.layers.any(|l| l.custom_type == custom_type)
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// Shared by [`Node`]'s tag-group/layer id cursors and
/// [`crate::taggroup::TagGroup`]'s tag id cursor: the same
/// wrap-in-`[0, 0xFFFE]` allocation scheme applies at every level.
pub(crate) fn next_id_in_node(cursor: &mut u16, occupied: impl Fn(u16) -> bool) -> Option<u16> {
    let start = cursor.wrapping_add(1);
    let mut candidate = start;
    loop {
        if candidate != 0xFFFF && !occupied(candidate) {
            *cursor = candidate;
            return Some(candidate);
        }
        candidate = if candidate == 0xFFFE { 0 } else { candidate + 1 };
        if candidate == start {
            return None;
        }
    }
}

/// Global node store: id-keyed container plus the allocator cursor.
pub struct NodeStore {
    pub nodes: HashedContainer<NodeId, Node>,
    last_common_node_id: Mutex<u32>,
    /// Live count of nodes allocated from the common (application) id
    /// range, tracked separately from `nodes.count()` since that also
    /// includes the system/avatar/user range. Checked against
    /// `MAX_COMMON_NODE_COUNT` before every allocation (spec §4.2).
    common_node_count: AtomicU32,
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            nodes: HashedContainer::new(),
            last_common_node_id: Mutex::new(FIRST_COMMON_NODE_ID - 1),
            common_node_count: AtomicU32::new(0),
        }
    }

    /// Allocate the next free application node id, starting just past the
    /// last one handed out, wrapping at `u32::MAX - 1` back to
    /// `FIRST_COMMON_NODE_ID`. Refuses once `MAX_COMMON_NODE_COUNT` nodes
    /// are live in the common range, independent of whether a wrap-around
    /// scan would still find a nominally free id (spec §4.2).
    pub fn allocate_id(&self) -> Result<NodeId> {
        if self.common_node_count.load(Ordering::Relaxed) >= MAX_COMMON_NODE_COUNT {
            return Err(Error::Other("common node count ceiling reached".into()));
        }

        let mut cursor = self.last_common_node_id.lock();
        let start = *cursor;
        let mut candidate = start;
        loop {
            candidate = if candidate >= u32::MAX - 1 {
                FIRST_COMMON_NODE_ID
            } else {
                candidate + 1
            };
            if !self.nodes.contains(NodeId(candidate)) {
                *cursor = candidate;
                return Ok(NodeId(candidate));
            }
            if candidate == start {
                return Err(Error::Other("node id space exhausted".into()));
            }
        }
    }

    /// Create a node under `parent_id`, attaching it to the parent's child
    /// list. The caller is responsible for sending `node_create` to any
    /// subscribers once this returns.
    pub fn create(&self, parent_id: NodeId, owner: UserId, custom_type: u16) -> Result<NodeId> {
        let parent_level = self
            .nodes
            .with(parent_id, |n| n.level)
            .ok_or_else(|| Error::Other(format!("create under unknown parent {parent_id}")))?;

        let id = self.allocate_id()?;
        let node = Node::new(id, Some(parent_id), owner, custom_type, parent_level + 1);
        self.nodes.add(node);
        self.nodes.with_mut(parent_id, |p| p.children.push(id));
        self.common_node_count.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Insert a node built directly (used by bootstrap and persistence
    /// restore, which assign system/well-known ids themselves).
    pub fn insert_raw(&self, node: Node) {
        let id = node.id;
        let parent = node.parent;
        self.nodes.add(node);
        if let Some(parent) = parent {
            self.nodes.with_mut(parent, |p| p.children.push(id));
        }
        if id.0 >= FIRST_COMMON_NODE_ID {
            self.common_node_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Destroy a node. Legal only when it has no children and no
    /// followers; refuses otherwise as a programming error, logging and
    /// returning an error rather than cascading an unsafe destroy.
    pub fn destroy(&self, id: NodeId) -> Result<()> {
        let (parent, can_destroy) = self
            .nodes
            .with(id, |n| (n.parent, n.children.is_empty() && n.lifecycle.follower_count() == 0))
            .ok_or_else(|| Error::Other(format!("destroy of unknown node {id}")))?;

        if !can_destroy {
            tracing::error!(node_id = %id, "refusing to destroy node with live children or followers");
            return Err(Error::Other(format!(
                "node {id} has live children or followers; destroy refused"
            )));
        }

        self.nodes.remove(id);
        if let Some(parent) = parent {
            self.nodes.with_mut(parent, |p| p.children.retain(|c| *c != id));
        }
        if id.0 >= FIRST_COMMON_NODE_ID {
            self.common_node_count.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::user::SUPER_USER_UID;

    #[test]
    fn allocate_id_starts_at_first_common_node_id() {
        let store = NodeStore::new();
        let id = store.allocate_id().unwrap();
        assert_eq!(id, NodeId(FIRST_COMMON_NODE_ID));
    }

    #[test]
    fn allocate_id_refuses_past_common_node_count_ceiling() {
        let store = NodeStore::new();
        store.common_node_count.store(MAX_COMMON_NODE_COUNT, Ordering::Relaxed);
        assert!(store.allocate_id().is_err());

        store.common_node_count.fetch_sub(1, Ordering::Relaxed);
        assert!(store.allocate_id().is_ok());
    }

    #[test]
    fn create_attaches_to_parent_children() {
        let store = NodeStore::new();
        let root = Node::new(NodeId::ROOT, None, SUPER_USER_UID, 0, 0);
        store.insert_raw(root);
        let child = store.create(NodeId::ROOT, SUPER_USER_UID, 7).unwrap();
        let children = store.nodes.with(NodeId::ROOT, |n| n.children.clone()).unwrap();
        assert_eq!(children, vec![child]);
    }

    #[test]
    fn destroy_refuses_when_children_present() {
        let store = NodeStore::new();
        let root = Node::new(NodeId::ROOT, None, SUPER_USER_UID, 0, 0);
        store.insert_raw(root);
        store.create(NodeId::ROOT, SUPER_USER_UID, 7).unwrap();
        assert!(store.destroy(NodeId::ROOT).is_err());
    }

    #[test]
    fn destroy_removes_leaf_node() {
        let store = NodeStore::new();
        let root = Node::new(NodeId::ROOT, None, SUPER_USER_UID, 0, 0);
        store.insert_raw(root);
        let child = store.create(NodeId::ROOT, SUPER_USER_UID, 7).unwrap();
        store.destroy(child).unwrap();
        assert!(!store.nodes.contains(child));
        let children = store.nodes.with(NodeId::ROOT, |n| n.children.clone()).unwrap();
        assert!(children.is_empty());
    }
}
