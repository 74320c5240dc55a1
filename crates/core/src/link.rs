//! Link graph.
//!
//! A [`crate::node::Node`] references its parent and children by
//! [`verse_domain::ids::NodeId`], resolved through the [`crate::node::NodeStore`]
//! rather than by owning pointer — cycles are structurally impossible
//! because [`test_reparent_allowed`] is checked before every re-parent.

use verse_domain::ids::NodeId;

use crate::node::NodeStore;

/// `true` iff `parent` could become the parent of `child` without
/// splitting the tree into two components.
///
/// If `parent` is strictly shallower than `child` it cannot possibly be a
/// descendant of `child` (a descendant is always deeper), so the walk is
/// skipped. Otherwise walk from `parent` up to the root looking for
/// `child`; finding it means the proposed link would create a cycle.
pub fn test_reparent_allowed(store: &NodeStore, parent: NodeId, child: NodeId) -> bool {
    let parent_level = match store.nodes.with(parent, |n| n.level) {
        Some(l) => l,
        None => return false,
    };
    let child_level = match store.nodes.with(child, |n| n.level) {
        Some(l) => l,
        None => return false,
    };

    if parent_level < child_level {
        return true;
    }

    let mut current = Some(parent);
    while let Some(id) = current {
        if id == child {
            return false;
        }
        current = store.nodes.with(id, |n| n.parent).flatten();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::user::SUPER_USER_UID;

    fn build_chain() -> NodeStore {
        // root(0) -> a -> b
        let store = NodeStore::new();
        let root = crate::node::Node::new(NodeId::ROOT, None, SUPER_USER_UID, 0, 0);
        store.insert_raw(root);
        let a = store.create(NodeId::ROOT, SUPER_USER_UID, 0).unwrap();
        let _b = store.create(a, SUPER_USER_UID, 0).unwrap();
        store
    }

    #[test]
    fn shallower_parent_is_always_allowed() {
        let store = build_chain();
        let a = store.nodes.with(NodeId::ROOT, |n| n.children[0]).unwrap();
        let b = store.nodes.with(a, |n| n.children[0]).unwrap();
        assert!(test_reparent_allowed(&store, NodeId::ROOT, b));
    }

    #[test]
    fn reparenting_onto_own_descendant_is_rejected() {
        let store = build_chain();
        let a = store.nodes.with(NodeId::ROOT, |n| n.children[0]).unwrap();
        let b = store.nodes.with(a, |n| n.children[0]).unwrap();
        // b is a's child; making a a child of b would cycle.
        assert!(!test_reparent_allowed(&store, b, a));
    }
}
