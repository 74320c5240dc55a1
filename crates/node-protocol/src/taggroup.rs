//! Tag-group-family command records.

use serde::{Deserialize, Serialize};
use verse_domain::ids::{NodeId, TagGroupId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum TagGroupOp {
    /// `tg_id` is [`crate::ALLOCATE_ID_U16`] when the client wants the
    /// server to assign one.
    Create { tg_id: TagGroupId, custom_type: u16 },
    Destroy { tg_id: TagGroupId },
    Subscribe { tg_id: TagGroupId },
    Unsubscribe { tg_id: TagGroupId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagGroupCmd {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub op: TagGroupOp,
}
