//! Tag-family command records.
//!
//! A wire format typically uses a separate opcode per `(data_type, count)`
//! combination (`tag_set_u32_2`, `tag_set_string8_1`, ...); decoded, they
//! all collapse to one `Set { value: Value }` variant here since the core
//! only needs the already-typed payload.

use serde::{Deserialize, Serialize};
use verse_domain::ids::{NodeId, TagGroupId, TagId};
use verse_domain::types::{DataType, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum TagOp {
    /// `tag_id` is [`crate::ALLOCATE_ID_U16`] when the client wants the
    /// server to assign one.
    Create {
        tag_id: TagId,
        data_type: DataType,
        count: u8,
        custom_type: u16,
    },
    Destroy { tag_id: TagId },
    Set { tag_id: TagId, value: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCmd {
    pub node_id: NodeId,
    pub tg_id: TagGroupId,
    #[serde(flatten)]
    pub op: TagOp,
}
