//! Mongo-shaped persistence projection, optional.
//!
//! One document per node keyed by its node id, carrying an append-only
//! `versions` list, plus one document per tag group and per layer keyed
//! by their (node, local-id) pair. [`DocumentStore`] is the seam a real
//! MongoDB client would sit behind; [`InMemoryDocumentStore`] is the
//! stand-in this workspace tests against.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use verse_domain::ids::{ItemId, LayerId, NodeId, TagGroupId, TagId, UserId};
use verse_domain::trace::TraceEvent;
use verse_domain::types::{DataType, NodeFlags, PermissionMask, Value};
use verse_domain::{Error, Result};

use crate::entity::Lifecycle;
use crate::layer::Layer;
use crate::node::{Node, NodeStore};
use crate::tag::Tag;
use crate::taggroup::TagGroup;

/// One saved revision of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeVersion {
    pub version: u64,
    pub crc32: u32,
    pub owner_id: UserId,
    pub permissions: Vec<(UserId, PermissionMask)>,
    pub child_nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    pub node_id: NodeId,
    pub custom_type: u16,
    pub versions: Vec<NodeVersion>,
}

impl NodeDocument {
    fn latest(&self) -> Option<&NodeVersion> {
        self.versions.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSnapshot {
    pub id: TagId,
    pub custom_type: u16,
    pub data_type: DataType,
    pub count: u8,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagGroupSnapshot {
    pub tags: Vec<TagSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagGroupDocument {
    pub node_id: NodeId,
    pub id: TagGroupId,
    pub custom_type: u16,
    pub current_version: u64,
    pub versions: HashMap<u64, TagGroupSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub parent: Option<LayerId>,
    pub values: Vec<(ItemId, Value)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDocument {
    pub node_id: NodeId,
    pub id: LayerId,
    pub custom_type: u16,
    pub data_type: DataType,
    pub num_vec_comp: u8,
    pub current_version: u64,
    pub versions: HashMap<u64, LayerSnapshot>,
}

/// Storage seam a real document database sits behind. Every method is
/// synchronous: the data thread calls straight into this from its own
/// housekeeping pass, and the calls themselves never block on network
/// I/O in this workspace's in-memory stand-in.
pub trait DocumentStore: Send + Sync {
    fn save_node(&self, doc: NodeDocument) -> Result<()>;
    fn load_node(&self, node_id: NodeId) -> Result<Option<NodeDocument>>;
    fn save_taggroup(&self, doc: TagGroupDocument) -> Result<()>;
    fn load_taggroups(&self, node_id: NodeId) -> Result<Vec<TagGroupDocument>>;
    fn save_layer(&self, doc: LayerDocument) -> Result<()>;
    fn load_layers(&self, node_id: NodeId) -> Result<Vec<LayerDocument>>;
}

/// In-memory stand-in used by tests and by `verse-server doctor` dry runs.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    nodes: Mutex<HashMap<NodeId, NodeDocument>>,
    taggroups: Mutex<HashMap<(NodeId, TagGroupId), TagGroupDocument>>,
    layers: Mutex<HashMap<(NodeId, LayerId), LayerDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn save_node(&self, doc: NodeDocument) -> Result<()> {
        self.nodes.lock().insert(doc.node_id, doc);
        Ok(())
    }

    fn load_node(&self, node_id: NodeId) -> Result<Option<NodeDocument>> {
        Ok(self.nodes.lock().get(&node_id).cloned())
    }

    fn save_taggroup(&self, doc: TagGroupDocument) -> Result<()> {
        self.taggroups.lock().insert((doc.node_id, doc.id), doc);
        Ok(())
    }

    fn load_taggroups(&self, node_id: NodeId) -> Result<Vec<TagGroupDocument>> {
        Ok(self
            .taggroups
            .lock()
            .values()
            .filter(|d| d.node_id == node_id)
            .cloned()
            .collect())
    }

    fn save_layer(&self, doc: LayerDocument) -> Result<()> {
        self.layers.lock().insert((doc.node_id, doc.id), doc);
        Ok(())
    }

    fn load_layers(&self, node_id: NodeId) -> Result<Vec<LayerDocument>> {
        Ok(self
            .layers
            .lock()
            .values()
            .filter(|d| d.node_id == node_id)
            .cloned()
            .collect())
    }
}

fn crc32_of(value: &impl Serialize) -> Result<u32> {
    let bytes = serde_json::to_vec(value).map_err(|e| Error::Persistence(e.to_string()))?;
    Ok(crc32fast::hash(&bytes))
}

/// Walk every node, flushing any `SAVEABLE` one whose version has moved
/// past what was last saved, plus its dirty tag groups and layers.
/// Returns the count of documents written.
pub fn flush(store: &NodeStore, docs: &dyn DocumentStore) -> Result<usize> {
    let mut written = 0usize;

    for node_id in store.nodes.keys() {
        let saveable = store.nodes.with(node_id, |n| n.flags.contains(NodeFlags::SAVEABLE)).unwrap_or(false);
        if !saveable {
            continue;
        }

        if flush_node(store, docs, node_id)? {
            written += 1;
        }
        written += flush_taggroups(store, docs, node_id)?;
        written += flush_layers(store, docs, node_id)?;
    }

    if written > 0 {
        TraceEvent::PersistenceFlushed { nodes_written: written, duration_ms: 0 }.emit();
    }
    Ok(written)
}

fn flush_node(store: &NodeStore, docs: &dyn DocumentStore, node_id: NodeId) -> Result<bool> {
    let dirty = store.nodes.with(node_id, |n| (n.version, n.saved_version, n.custom_type)).map(|(v, sv, ct)| (v > sv, v, ct));
    let Some((true, version, custom_type)) = dirty else {
        return Ok(false);
    };

    let (owner_id, permissions, child_nodes) = store
        .nodes
        .with(node_id, |n| (n.acl.owner(), n.acl.entries().to_vec(), n.children.clone()))
        .ok_or_else(|| Error::Persistence(format!("node {node_id} vanished mid-flush")))?;

    let crc32 = crc32_of(&(version, owner_id, &permissions, &child_nodes))?;
    let nv = NodeVersion { version, crc32, owner_id, permissions, child_nodes };

    let mut doc = docs.load_node(node_id)?.unwrap_or_else(|| NodeDocument { node_id, custom_type, versions: Vec::new() });
    doc.versions.push(nv);
    match docs.save_node(doc) {
        Ok(()) => {
            store.nodes.with_mut(node_id, |n| n.saved_version = version);
            Ok(true)
        }
        Err(e) => {
            TraceEvent::PersistenceFailed { node_id: node_id.0, reason: e.to_string() }.emit();
            Err(e)
        }
    }
}

fn flush_taggroups(store: &NodeStore, docs: &dyn DocumentStore, node_id: NodeId) -> Result<usize> {
    let tg_ids = store.nodes.with(node_id, |n| n.tag_groups.keys()).unwrap_or_default();
    let mut written = 0usize;
    for tg_id in tg_ids {
        let dirty = store
            .nodes
            .with(node_id, |n| n.tag_groups.with(tg_id, |tg| (tg.version, tg.saved_version, tg.custom_type)))
            .flatten();
        let Some((version, saved_version, custom_type)) = dirty else { continue };
        if version <= saved_version {
            continue;
        }

        let mut tags = Vec::new();
        store.nodes.with(node_id, |n| {
            n.tag_groups.with(tg_id, |tg| {
                tg.tags.for_each(|t| {
                    tags.push(TagSnapshot { id: t.id, custom_type: t.custom_type, data_type: t.data_type, count: t.count, value: t.value.clone() });
                })
            })
        });

        let mut doc = docs
            .load_taggroups(node_id)?
            .into_iter()
            .find(|d| d.id == tg_id)
            .unwrap_or_else(|| TagGroupDocument { node_id, id: tg_id, custom_type, current_version: 0, versions: HashMap::new() });
        doc.current_version = version;
        doc.versions.insert(version, TagGroupSnapshot { tags });
        docs.save_taggroup(doc)?;
        store.nodes.with(node_id, |n| n.tag_groups.with_mut(tg_id, |tg| tg.saved_version = version));
        written += 1;
    }
    Ok(written)
}

fn flush_layers(store: &NodeStore, docs: &dyn DocumentStore, node_id: NodeId) -> Result<usize> {
    let layer_ids = store.nodes.with(node_id, |n| n.layers.keys()).unwrap_or_default();
    let mut written = 0usize;
    for layer_id in layer_ids {
        let dirty = store
            .nodes
            .with(node_id, |n| n.layers.with(layer_id, |l| (l.version, l.saved_version, l.custom_type, l.data_type, l.num_vec_comp, l.parent)))
            .flatten();
        let Some((version, saved_version, custom_type, data_type, num_vec_comp, parent)) = dirty else { continue };
        if version <= saved_version {
            continue;
        }

        let values = store
            .nodes
            .with(node_id, |n| n.layers.with(layer_id, |l| l.values.values().into_iter().map(|v| (v.item_id, v.value.clone())).collect::<Vec<_>>()))
            .flatten()
            .unwrap_or_default();

        let mut doc = docs
            .load_layers(node_id)?
            .into_iter()
            .find(|d| d.id == layer_id)
            .unwrap_or_else(|| LayerDocument { node_id, id: layer_id, custom_type, data_type, num_vec_comp, current_version: 0, versions: HashMap::new() });
        doc.current_version = version;
        doc.versions.insert(version, LayerSnapshot { parent, values });
        docs.save_layer(doc)?;
        store.nodes.with(node_id, |n| n.layers.with_mut(layer_id, |l| l.saved_version = version));
        written += 1;
    }
    Ok(written)
}

/// Restore the scene-parent subtree from `docs` at startup. Returns
/// `true` if a stored tree was found and restored, `false` if the caller
/// should keep the bootstrap default. A restore failure never poisons
/// the in-memory graph — the scene-parent subtree bootstrap already
/// built is left untouched and the caller falls back to it.
pub fn restore(store: &NodeStore, docs: &dyn DocumentStore) -> Result<bool> {
    let Some(root_doc) = docs.load_node(NodeId::SCENE_PARENT)? else {
        return Ok(false);
    };
    let Some(root_version) = root_doc.latest() else {
        return Ok(false);
    };

    teardown_subtree(store, NodeId::SCENE_PARENT)?;

    store.nodes.with_mut(NodeId::SCENE_PARENT, |n| {
        n.acl.set_owner(root_version.owner_id);
        for (user, mask) in &root_version.permissions {
            n.acl.set_perm(*user, *mask);
        }
        n.version = root_version.version;
        n.saved_version = root_version.version;
        n.crc32 = root_version.crc32;
        n.flags = NodeFlags::SAVEABLE;
    });

    for child_id in &root_version.child_nodes {
        restore_node_recursive(store, docs, *child_id, NodeId::SCENE_PARENT)?;
    }

    Ok(true)
}

fn restore_node_recursive(store: &NodeStore, docs: &dyn DocumentStore, node_id: NodeId, parent_id: NodeId) -> Result<()> {
    let Some(doc) = docs.load_node(node_id)? else {
        return Err(Error::Persistence(format!("child node {node_id} referenced by parent {parent_id} has no document")));
    };
    let Some(version) = doc.latest() else {
        return Err(Error::Persistence(format!("node {node_id} document has no saved version")));
    };

    let parent_level = store.nodes.with(parent_id, |n| n.level).unwrap_or(0);
    let mut node = Node::new(node_id, Some(parent_id), version.owner_id, doc.custom_type, parent_level + 1);
    for (user, mask) in &version.permissions {
        node.acl.set_perm(*user, *mask);
    }
    node.version = version.version;
    node.saved_version = version.version;
    node.crc32 = version.crc32;
    node.flags = NodeFlags::SAVEABLE;
    node.lifecycle = Lifecycle::new_created();
    store.insert_raw(node);

    for tg_doc in docs.load_taggroups(node_id)? {
        restore_taggroup(store, node_id, tg_doc);
    }
    for layer_doc in docs.load_layers(node_id)? {
        restore_layer(store, node_id, layer_doc);
    }

    for child_id in &version.child_nodes {
        restore_node_recursive(store, docs, *child_id, node_id)?;
    }
    Ok(())
}

fn restore_taggroup(store: &NodeStore, node_id: NodeId, doc: TagGroupDocument) {
    let Some(snapshot) = doc.versions.get(&doc.current_version) else { return };
    let mut tg = TagGroup::new(doc.id, doc.custom_type);
    tg.version = doc.current_version;
    tg.saved_version = doc.current_version;
    tg.lifecycle = Lifecycle::new_created();
    for tag in &snapshot.tags {
        let mut t = Tag::new(tag.id, tag.data_type, tag.count, tag.custom_type);
        if let Some(value) = tag.value.clone() {
            t.set_value(value);
        }
        t.lifecycle = Lifecycle::new_created();
        tg.tags.add(t);
    }
    store.nodes.with_mut(node_id, |n| n.tag_groups.add(tg));
}

fn restore_layer(store: &NodeStore, node_id: NodeId, doc: LayerDocument) {
    let Some(snapshot) = doc.versions.get(&doc.current_version) else { return };
    let mut layer = Layer::new(doc.id, snapshot.parent, doc.data_type, doc.num_vec_comp, doc.custom_type);
    layer.version = doc.current_version;
    layer.saved_version = doc.current_version;
    layer.lifecycle = Lifecycle::new_created();
    for (item_id, value) in &snapshot.values {
        layer.set_value(*item_id, value.clone());
    }
    // `set_value` above bumped `version` past what the snapshot recorded;
    // pin it back to the restored value so a later `flush` doesn't think
    // restoring dirtied the layer.
    layer.version = doc.current_version;
    store.nodes.with_mut(node_id, |n| n.layers.add(layer));
}

/// Destroy every descendant of `node_id` (not `node_id` itself), deepest
/// first, so a freshly-bootstrapped scene-parent subtree can be replaced
/// by a restored one. No followers exist yet this early in startup, so
/// `NodeStore::destroy` never refuses.
fn teardown_subtree(store: &NodeStore, node_id: NodeId) -> Result<()> {
    let children = store.nodes.with(node_id, |n| n.children.clone()).unwrap_or_default();
    for child in children {
        teardown_subtree(store, child)?;
        store.destroy(child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::types::Component;
    use verse_domain::user::SUPER_USER_UID;

    fn fresh() -> NodeStore {
        let store = NodeStore::new();
        crate::bootstrap::bootstrap(&store, &[]);
        store
    }

    #[test]
    fn flush_skips_nodes_without_the_saveable_flag() {
        let store = fresh();
        let child = store.create(NodeId::SCENE_PARENT, SUPER_USER_UID, 1).unwrap();
        store.nodes.with_mut(child, |n| n.bump_version());
        let docs = InMemoryDocumentStore::new();
        let written = flush(&store, &docs).unwrap();
        assert_eq!(written, 0);
        assert!(docs.load_node(child).unwrap().is_none());
    }

    #[test]
    fn flush_then_reload_round_trips_node_version() {
        let store = fresh();
        let child = store.create(NodeId::SCENE_PARENT, SUPER_USER_UID, 1).unwrap();
        store.nodes.with_mut(child, |n| {
            n.flags = NodeFlags::SAVEABLE;
            n.bump_version();
        });
        let docs = InMemoryDocumentStore::new();
        let written = flush(&store, &docs).unwrap();
        assert_eq!(written, 1);

        let doc = docs.load_node(child).unwrap().unwrap();
        assert_eq!(doc.versions.len(), 1);
        assert_eq!(doc.versions[0].version, 1);

        let again = flush(&store, &docs).unwrap();
        assert_eq!(again, 0, "nothing dirty, nothing to flush");
    }

    #[test]
    fn restore_rebuilds_scene_parent_subtree_at_its_saved_ids() {
        let store = fresh();
        let child = store.create(NodeId::SCENE_PARENT, SUPER_USER_UID, 7).unwrap();
        store.nodes.with_mut(child, |n| {
            n.flags = NodeFlags::SAVEABLE;
            n.bump_version();
        });
        let tg_id = store.nodes.with_mut(child, |n| n.next_tag_group_id()).unwrap().unwrap();
        store.nodes.with_mut(child, |n| n.tag_groups.add(TagGroup::new(tg_id, 3)));
        let tag_id = store
            .nodes
            .with_mut(child, |n| {
                n.tag_groups.with_mut(tg_id, |tg| {
                    let tag_id = tg.next_tag_id().unwrap();
                    let mut tag = Tag::new(tag_id, DataType::U32, 1, 9);
                    tag.set_value(Value::Vector(vec![Component::U32(42)]));
                    tg.tags.add(tag);
                    tg.bump_version();
                    tag_id
                })
            })
            .flatten()
            .unwrap();

        let docs = InMemoryDocumentStore::new();
        // seed scene-parent's own document so `restore` has a root to find.
        store.nodes.with_mut(NodeId::SCENE_PARENT, |n| {
            n.flags = NodeFlags::SAVEABLE;
            n.bump_version();
        });
        flush(&store, &docs).unwrap();

        let fresh_store = NodeStore::new();
        crate::bootstrap::bootstrap(&fresh_store, &[]);
        let restored = restore(&fresh_store, &docs).unwrap();
        assert!(restored);

        assert!(fresh_store.nodes.contains(child));
        let restored_custom_type = fresh_store.nodes.with(child, |n| n.custom_type).unwrap();
        assert_eq!(restored_custom_type, 7);
        let tag_value = fresh_store
            .nodes
            .with(child, |n| n.tag_groups.with(tg_id, |tg| tg.tags.with(tag_id, |t| t.value.clone())))
            .flatten()
            .flatten()
            .flatten();
        assert_eq!(tag_value, Some(Value::Vector(vec![Component::U32(42)])));
    }
}
