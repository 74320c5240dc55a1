//! Node-family command records.

use serde::{Deserialize, Serialize};
use verse_domain::ids::{NodeId, UserId};
use verse_domain::types::PermissionMask;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum NodeCmd {
    /// Client → server: request creation of a node under `parent_id`. The
    /// server always allocates the id; a client-supplied id is meaningless
    /// here (unlike tag-groups/tags/layers there is no node-id sentinel in
    /// this direction — nodes are always server-named).
    Create {
        parent_id: NodeId,
        owner: UserId,
        custom_type: u16,
    },
    /// Server → follower: announces a node's existence.
    CreateBroadcast {
        node_id: NodeId,
        parent_id: NodeId,
        owner: UserId,
        custom_type: u16,
    },
    Destroy { node_id: NodeId },
    /// `version` is reserved for future schema negotiation; only `0` is
    /// currently honoured, any other value logs a warning and is treated
    /// as `0`.
    Subscribe { node_id: NodeId, version: u8, crc32: u32 },
    Unsubscribe { node_id: NodeId },
    Link { parent_id: NodeId, child_id: NodeId },
    Perm { node_id: NodeId, user_id: UserId, mask: PermissionMask },
    Owner { node_id: NodeId, owner: UserId },
    Lock { node_id: NodeId },
    Unlock { node_id: NodeId },
    /// Sets the calling session's fan-out priority for `node_id` and,
    /// recursively, for every descendant the session is already
    /// subscribed to.
    Prio { node_id: NodeId, prio: u8 },
}

impl NodeCmd {
    pub fn node_id(&self) -> NodeId {
        match self {
            NodeCmd::Create { parent_id, .. } => *parent_id,
            NodeCmd::CreateBroadcast { node_id, .. } => *node_id,
            NodeCmd::Destroy { node_id }
            | NodeCmd::Subscribe { node_id, .. }
            | NodeCmd::Unsubscribe { node_id }
            | NodeCmd::Perm { node_id, .. }
            | NodeCmd::Owner { node_id, .. }
            | NodeCmd::Lock { node_id }
            | NodeCmd::Unlock { node_id }
            | NodeCmd::Prio { node_id, .. } => *node_id,
            NodeCmd::Link { child_id, .. } => *child_id,
        }
    }
}
