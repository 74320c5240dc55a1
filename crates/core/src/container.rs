//! Generic hashed-keyed container.
//!
//! A `HashMap` for O(1) lookup plus a parallel insertion-order `Vec` of
//! keys, both behind one [`parking_lot::RwLock`] so read-only lookups (a
//! transport thread peeking at state) never block each other. One instance
//! of this type backs each of the five id-keyed collections in the graph:
//! nodes (by `NodeId`), tag groups and layers (by their id within a node),
//! tags (by id within a tag group), and layer items (by `ItemId`).

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

/// Implemented by anything stored in a [`HashedContainer`] so the
/// container can recover the key from the value alone.
pub trait Keyed<K> {
    fn key(&self) -> K;
}

struct Inner<K, V> {
    order: Vec<K>,
    items: HashMap<K, V>,
}

/// Insertion-ordered, concurrently-readable map keyed by an id embedded in
/// the stored value.
pub struct HashedContainer<K, V> {
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> Default for HashedContainer<K, V>
where
    K: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> HashedContainer<K, V>
where
    K: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                order: Vec::new(),
                items: HashMap::new(),
            }),
        }
    }

    /// Insert `item` under its own key, returning whatever previously
    /// occupied that key. Callers that must reject duplicate keys (tag
    /// groups rejecting a duplicate `custom_type`, say) check that
    /// separately before calling this — `add` itself is unconditional.
    pub fn add(&self, item: V) -> Option<V>
    where
        V: Keyed<K>,
    {
        let key = item.key();
        let mut inner = self.inner.write();
        let previous = inner.items.insert(key, item);
        if previous.is_none() {
            inner.order.push(key);
        }
        previous
    }

    pub fn remove(&self, key: K) -> Option<V> {
        let mut inner = self.inner.write();
        let removed = inner.items.remove(&key);
        if removed.is_some() {
            inner.order.retain(|k| *k != key);
        }
        removed
    }

    pub fn contains(&self, key: K) -> bool {
        self.inner.read().items.contains_key(&key)
    }

    pub fn count(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn find(&self, key: K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().items.get(&key).cloned()
    }

    /// Run `f` against the stored value without cloning it.
    pub fn with<R>(&self, key: K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.inner.read().items.get(&key).map(f)
    }

    /// Run `f` against a mutable borrow of the stored value.
    pub fn with_mut<R>(&self, key: K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.inner.write().items.get_mut(&key).map(f)
    }

    /// Snapshot of every stored value in insertion order.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|k| inner.items.get(k).cloned())
            .collect()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.read().order.clone()
    }

    /// `true` if any stored value satisfies `pred`, without cloning.
    pub fn any(&self, pred: impl Fn(&V) -> bool) -> bool {
        let inner = self.inner.read();
        inner.order.iter().any(|k| inner.items.get(k).is_some_and(|v| pred(v)))
    }

    pub fn for_each(&self, mut f: impl FnMut(&V)) {
        let inner = self.inner.read();
        for k in &inner.order {
            if let Some(v) = inner.items.get(k) {
                f(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        label: &'static str,
    }

    impl Keyed<u32> for Item {
        fn key(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn preserves_insertion_order() {
        let c: HashedContainer<u32, Item> = HashedContainer::new();
        c.add(Item { id: 3, label: "c" });
        c.add(Item { id: 1, label: "a" });
        c.add(Item { id: 2, label: "b" });
        let values = c.values();
        assert_eq!(values.iter().map(|i| i.id).collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn remove_drops_from_order_and_index() {
        let c: HashedContainer<u32, Item> = HashedContainer::new();
        c.add(Item { id: 1, label: "a" });
        c.add(Item { id: 2, label: "b" });
        assert!(c.remove(1).is_some());
        assert!(!c.contains(1));
        assert_eq!(c.count(), 1);
        assert_eq!(c.values()[0].id, 2);
    }

    #[test]
    fn re_adding_same_key_replaces_without_duplicating_order() {
        let c: HashedContainer<u32, Item> = HashedContainer::new();
        c.add(Item { id: 1, label: "a" });
        let previous = c.add(Item { id: 1, label: "a2" });
        assert_eq!(previous.unwrap().label, "a");
        assert_eq!(c.count(), 1);
        assert_eq!(c.values()[0].label, "a2");
    }

    #[test]
    fn with_mut_mutates_in_place() {
        let c: HashedContainer<u32, Item> = HashedContainer::new();
        c.add(Item { id: 1, label: "a" });
        c.with_mut(1, |item| item.label = "changed");
        assert_eq!(c.find(1).unwrap().label, "changed");
    }
}
