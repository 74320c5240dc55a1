//! Tag.
//!
//! A tag belongs to exactly one tag group and carries its own follower
//! list (create/destroy acks), but is only ever *subscribed* to via its
//! containing tag group — there is no standalone `tag_subscribe` opcode.

use verse_domain::ids::TagId;
use verse_domain::types::{DataType, Value};

use crate::container::Keyed;
use crate::entity::Lifecycle;

pub struct Tag {
    pub id: TagId,
    pub custom_type: u16,
    pub data_type: DataType,
    pub count: u8,
    pub value: Option<Value>,
    /// Set once the tag has been written to at least once.
    pub initialized: bool,
    pub lifecycle: Lifecycle,
}

impl Keyed<TagId> for Tag {
    fn key(&self) -> TagId {
        self.id
    }
}

impl Tag {
    pub fn new(id: TagId, data_type: DataType, count: u8, custom_type: u16) -> Self {
        Self {
            id,
            custom_type,
            data_type,
            count,
            value: None,
            initialized: false,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Tag set handler body: copy the value in, mark initialized. Schema
    /// mismatch is the caller's responsibility to check before calling
    /// this (validation failures are dropped silently, not represented
    /// as an `Err` here).
    pub fn set_value(&mut self, value: Value) {
        self.value = Some(value);
        self.initialized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::types::Component;

    #[test]
    fn set_value_marks_initialized() {
        let mut tag = Tag::new(TagId(1), DataType::U32, 1, 7);
        assert!(!tag.initialized);
        tag.set_value(Value::Vector(vec![Component::U32(42)]));
        assert!(tag.initialized);
        assert_eq!(tag.value, Some(Value::Vector(vec![Component::U32(42)])));
    }
}
