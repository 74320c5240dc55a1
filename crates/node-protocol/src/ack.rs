//! "Fake" acknowledgement commands, synthesized locally by a transport
//! adapter once it confirms delivery of a `*_create`, `*_destroy`,
//! `node_lock` or `node_unlock` command to a specific follower. These
//! never arrive as their own wire opcode; they are how the per-follower
//! lifecycle FSM learns that a send succeeded.

use serde::{Deserialize, Serialize};
use verse_domain::ids::{LayerId, NodeId, TagGroupId, TagId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "entity")]
pub enum Ack {
    NodeCreate { node_id: NodeId },
    NodeDestroy { node_id: NodeId },
    NodeLock { node_id: NodeId },
    NodeUnlock { node_id: NodeId },
    TagGroupCreate { node_id: NodeId, tg_id: TagGroupId },
    TagGroupDestroy { node_id: NodeId, tg_id: TagGroupId },
    TagCreate { node_id: NodeId, tg_id: TagGroupId, tag_id: TagId },
    TagDestroy { node_id: NodeId, tg_id: TagGroupId, tag_id: TagId },
    LayerCreate { node_id: NodeId, layer_id: LayerId },
    LayerDestroy { node_id: NodeId, layer_id: LayerId },
}

impl Ack {
    pub fn node_id(&self) -> NodeId {
        match *self {
            Ack::NodeCreate { node_id }
            | Ack::NodeDestroy { node_id }
            | Ack::NodeLock { node_id }
            | Ack::NodeUnlock { node_id }
            | Ack::TagGroupCreate { node_id, .. }
            | Ack::TagGroupDestroy { node_id, .. }
            | Ack::TagCreate { node_id, .. }
            | Ack::TagDestroy { node_id, .. }
            | Ack::LayerCreate { node_id, .. }
            | Ack::LayerDestroy { node_id, .. } => node_id,
        }
    }
}
