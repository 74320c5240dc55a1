//! Wire-level value types shared by tags and layers, and the access-control
//! bitmask.

use serde::{Deserialize, Serialize};

/// Primitive value type carried by a tag or a layer component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    U32,
    U64,
    Real16,
    Real32,
    Real64,
    /// Tag-only: length-prefixed UTF-8. Never valid for a layer component.
    String8,
}

impl DataType {
    /// `true` for every type a [`Layer`](crate) component may use.
    pub fn valid_for_layer(self) -> bool {
        !matches!(self, DataType::String8)
    }
}

/// A single scalar component of a vector value (tags hold 1..4, layer
/// tuples hold `num_vec_comp` of these, all sharing one `DataType`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Component {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Real16(u16), // half-float bit pattern; no native f16 in stable std
    Real32(f32),
    Real64(f64),
}

impl Component {
    pub fn data_type(&self) -> DataType {
        match self {
            Component::U8(_) => DataType::U8,
            Component::U16(_) => DataType::U16,
            Component::U32(_) => DataType::U32,
            Component::U64(_) => DataType::U64,
            Component::Real16(_) => DataType::Real16,
            Component::Real32(_) => DataType::Real32,
            Component::Real64(_) => DataType::Real64,
        }
    }
}

/// The value held by a tag or a layer item: either a short fixed-arity
/// vector of [`Component`]s (1..4, all the same `DataType`) or, for tags
/// only, an owned string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Vector(Vec<Component>),
    String8(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Vector(v) => v.first().map(Component::data_type).unwrap_or(DataType::U8),
            Value::String8(_) => DataType::String8,
        }
    }

    pub fn count(&self) -> u8 {
        match self {
            Value::Vector(v) => v.len() as u8,
            Value::String8(_) => 1,
        }
    }

    /// `true` if `self` matches the declared `(data_type, count)` schema of
    /// the tag/layer it is being written into.
    pub fn matches_schema(&self, data_type: DataType, count: u8) -> bool {
        match self {
            Value::String8(_) => data_type == DataType::String8 && count == 1,
            Value::Vector(components) => {
                data_type != DataType::String8
                    && components.len() as u8 == count
                    && components.iter().all(|c| c.data_type() == data_type)
            }
        }
    }
}

bitflags::bitflags! {
    /// Per-(node, user) access mask. `READ` gates subscribe; `WRITE` gates
    /// mutating commands (set, link, perm, lock...).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PermissionMask: u8 {
        const READ  = 0b01;
        const WRITE = 0b10;
    }
}

bitflags::bitflags! {
    /// Per-node flags. Only `SAVEABLE` is currently defined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct NodeFlags: u8 {
        const SAVEABLE = 0b01;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_schema_match() {
        let v = Value::Vector(vec![Component::U32(1), Component::U32(2)]);
        assert!(v.matches_schema(DataType::U32, 2));
        assert!(!v.matches_schema(DataType::U32, 3));
        assert!(!v.matches_schema(DataType::U16, 2));
    }

    #[test]
    fn string_schema_match() {
        let v = Value::String8("hello".into());
        assert!(v.matches_schema(DataType::String8, 1));
        assert!(!v.matches_schema(DataType::U8, 1));
    }

    #[test]
    fn string_is_invalid_for_layers() {
        assert!(!DataType::String8.valid_for_layer());
        assert!(DataType::U32.valid_for_layer());
    }
}
