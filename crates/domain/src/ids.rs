//! Well-known identifiers and id-space constants.
//!
//! Node ids below `FIRST_COMMON_NODE_ID` are reserved for the system
//! skeleton and per-user avatar nodes; everything above is handed out to
//! application nodes by [`verse_core`](../verse_core/index.html)'s
//! allocator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node id. `0..FIRST_COMMON_NODE_ID` is the reserved system range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
    pub const AVATAR_PARENT: NodeId = NodeId(1);
    pub const USER_PARENT: NodeId = NodeId(2);
    pub const SCENE_PARENT: NodeId = NodeId(3);

    /// Sentinel the client sends in a `node_create` request to mean
    /// "server, please allocate an id".
    pub const UNASSIGNED: NodeId = NodeId(u32::MAX);

    pub fn is_system(self) -> bool {
        self.0 < FIRST_COMMON_NODE_ID
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(v: u32) -> Self {
        NodeId(v)
    }
}

/// First id handed out to application (non-system, non-avatar) nodes.
pub const FIRST_COMMON_NODE_ID: u32 = 65536;

/// Ceiling enforced by the allocator in addition to wrap-around. A
/// practical cap recorded as a design decision in `DESIGN.md`.
pub const MAX_COMMON_NODE_COUNT: u32 = 1_000_000;

/// Maximum tag groups per node.
pub const MAX_TAGGROUPS_COUNT: usize = 65_534;

/// Maximum layers per node.
pub const MAX_LAYERS_COUNT: usize = 65_534;

/// Per-user avatar node ids reuse the user id and live in `[1000, 65535]`.
pub const FIRST_USER_ID: u16 = 1000;

/// A user account id. Avatar node ids are minted by widening this to
/// [`NodeId`], so the two spaces must never overlap the common-node range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u16);

impl UserId {
    pub fn as_node_id(self) -> NodeId {
        NodeId(self.0 as u32)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection session id, assigned locally by the gateway (never sent
/// over the wire in the sense of being globally meaningful — it only scopes
/// queues and follower/subscriber bookkeeping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Tag-group id, unique within its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagGroupId(pub u16);

/// Sentinel meaning "server, allocate a tag-group id".
pub const TAG_GROUP_ID_UNASSIGNED: u16 = 0xFFFF;

/// Tag id, unique within its owning tag group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId(pub u16);

pub const TAG_ID_UNASSIGNED: u16 = 0xFFFF;

/// Layer id, unique within its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u16);

pub const LAYER_ID_UNASSIGNED: u16 = 0xFFFF;

/// Item id inside a layer's keyed map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_nodes_are_below_first_common() {
        for id in [
            NodeId::ROOT,
            NodeId::AVATAR_PARENT,
            NodeId::USER_PARENT,
            NodeId::SCENE_PARENT,
        ] {
            assert!(id.is_system());
        }
        assert!(!NodeId(FIRST_COMMON_NODE_ID).is_system());
    }

    #[test]
    fn avatar_node_id_matches_user_id() {
        let user = UserId(1042);
        assert_eq!(user.as_node_id(), NodeId(1042));
    }
}
