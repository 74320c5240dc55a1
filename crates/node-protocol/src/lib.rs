//! Node-graph protocol: decoded command records exchanged between a session
//! and the shared-state engine.
//!
//! The wire encoding of the ~90 opcodes this family represents is a
//! transport concern and lives outside this crate; `verse-core` only ever
//! sees and produces the [`Command`] values defined here, already decoded
//! from (or destined for) a per-session queue.

pub mod ack;
pub mod layer;
pub mod node;
pub mod tag;
pub mod taggroup;

pub use ack::Ack;
pub use layer::LayerCmd;
pub use node::NodeCmd;
pub use tag::TagCmd;
pub use taggroup::TagGroupCmd;

use serde::{Deserialize, Serialize};
use verse_domain::ids::{LayerId, NodeId, TagGroupId, TagId};

/// A single decoded command record, tagged by family: whatever a transport
/// adapter decodes off the wire, and whatever the dispatcher pushes back
/// onto an outbound priority queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family")]
pub enum Command {
    Node(NodeCmd),
    TagGroup(TagGroupCmd),
    Tag(TagCmd),
    Layer(LayerCmd),
    /// Locally synthesized once a transport confirms delivery of a
    /// `*_create`/`*_destroy`/`node_lock`/`node_unlock` command — never
    /// arrives over the wire as its own opcode.
    Ack(Ack),
}

impl Command {
    /// The node this command is scoped to, when it names exactly one
    /// (every opcode family does). Used by the dispatcher to look up the
    /// target node before routing to a handler.
    pub fn node_id(&self) -> NodeId {
        match self {
            Command::Node(c) => c.node_id(),
            Command::TagGroup(c) => c.node_id,
            Command::Tag(c) => c.node_id,
            Command::Layer(c) => c.node_id,
            Command::Ack(a) => a.node_id(),
        }
    }
}

/// Sentinel a client sends in place of a real id to mean "server, please
/// allocate one" for tag-group/tag/layer ids.
pub const ALLOCATE_ID_U16: u16 = 0xFFFF;

/// Same role as [`ALLOCATE_ID_U16`] but for node ids.
pub const ALLOCATE_ID_U32: u32 = 0xFFFF_FFFF;

pub fn tg_is_allocate(id: TagGroupId) -> bool {
    id.0 == ALLOCATE_ID_U16
}
pub fn tag_is_allocate(id: TagId) -> bool {
    id.0 == ALLOCATE_ID_U16
}
pub fn layer_is_allocate(id: LayerId) -> bool {
    id.0 == ALLOCATE_ID_U16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_sentinels_round_trip() {
        assert!(tg_is_allocate(TagGroupId(ALLOCATE_ID_U16)));
        assert!(tag_is_allocate(TagId(ALLOCATE_ID_U16)));
        assert!(layer_is_allocate(LayerId(ALLOCATE_ID_U16)));
        assert!(!tg_is_allocate(TagGroupId(3)));
    }
}
