//! Layer: a per-node hashed map from item id to a fixed-arity typed tuple,
//! with its own nested tree of parent/child layers independent of the
//! node tree.

use verse_domain::ids::{ItemId, LayerId};
use verse_domain::types::{DataType, Value};

use crate::container::{HashedContainer, Keyed};
use crate::entity::Lifecycle;
use crate::subscribers::Subscribers;

#[derive(Debug, Clone)]
pub struct LayerItem {
    pub item_id: ItemId,
    pub value: Value,
}

impl Keyed<ItemId> for LayerItem {
    fn key(&self) -> ItemId {
        self.item_id
    }
}

pub struct Layer {
    pub id: LayerId,
    pub custom_type: u16,
    pub data_type: DataType,
    pub num_vec_comp: u8,
    /// Non-owning back-reference within the same node.
    pub parent: Option<LayerId>,
    pub children: Vec<LayerId>,
    pub values: HashedContainer<ItemId, LayerItem>,
    pub lifecycle: Lifecycle,
    pub subscribers: Subscribers,
    pub version: u64,
    pub saved_version: u64,
}

impl Keyed<LayerId> for Layer {
    fn key(&self) -> LayerId {
        self.id
    }
}

impl Layer {
    pub fn new(
        id: LayerId,
        parent: Option<LayerId>,
        data_type: DataType,
        num_vec_comp: u8,
        custom_type: u16,
    ) -> Self {
        Self {
            id,
            custom_type,
            data_type,
            num_vec_comp,
            parent,
            children: Vec::new(),
            values: HashedContainer::new(),
            lifecycle: Lifecycle::new(),
            subscribers: Subscribers::new(),
            version: 0,
            saved_version: 0,
        }
    }

    /// Layer set-value handler body: schema must match exactly, checked
    /// by the caller before invoking this (mismatch is a silent drop, not
    /// an `Err`).
    pub fn set_value(&mut self, item_id: ItemId, value: Value) {
        self.values.add(LayerItem { item_id, value });
        self.version += 1;
    }

    /// Unset `item_id` in this layer only, returning whether it was
    /// present. The caller announces `layer_unset_value` only for the
    /// layer unset was called on directly, never for the recursive
    /// cascade into descendants.
    pub fn unset_local(&mut self, item_id: ItemId) -> bool {
        let removed = self.values.remove(item_id).is_some();
        if removed {
            self.version += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::types::Component;

    #[test]
    fn set_then_unset_round_trips() {
        let mut layer = Layer::new(LayerId(1), None, DataType::U32, 1, 0);
        layer.set_value(ItemId(7), Value::Vector(vec![Component::U32(1)]));
        assert!(layer.values.contains(ItemId(7)));
        assert!(layer.unset_local(ItemId(7)));
        assert!(!layer.values.contains(ItemId(7)));
        assert!(!layer.unset_local(ItemId(7)));
    }
}
