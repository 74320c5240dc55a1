//! Layer-family command records.

use serde::{Deserialize, Serialize};
use verse_domain::ids::{ItemId, LayerId, NodeId};
use verse_domain::types::{DataType, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum LayerOp {
    /// `layer_id` is [`crate::ALLOCATE_ID_U16`] when the client wants the
    /// server to assign one; `parent_layer_id` is the same sentinel when
    /// the new layer has no parent.
    Create {
        layer_id: LayerId,
        parent_layer_id: LayerId,
        data_type: DataType,
        num_vec_comp: u8,
        custom_type: u16,
    },
    Destroy { layer_id: LayerId },
    Subscribe { layer_id: LayerId },
    Unsubscribe { layer_id: LayerId },
    SetValue {
        layer_id: LayerId,
        item_id: ItemId,
        value: Value,
    },
    UnsetValue { layer_id: LayerId, item_id: ItemId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerCmd {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub op: LayerOp,
}
