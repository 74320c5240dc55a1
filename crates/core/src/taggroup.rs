//! Tag group.

use verse_domain::ids::{TagGroupId, TagId};

use crate::container::{HashedContainer, Keyed};
use crate::entity::Lifecycle;
use crate::subscribers::Subscribers;
use crate::tag::Tag;

pub struct TagGroup {
    pub id: TagGroupId,
    pub custom_type: u16,
    pub tags: HashedContainer<TagId, Tag>,
    pub lifecycle: Lifecycle,
    pub subscribers: Subscribers,
    pub version: u64,
    pub saved_version: u64,
    last_tag_id: u16,
}

impl Keyed<TagGroupId> for TagGroup {
    fn key(&self) -> TagGroupId {
        self.id
    }
}

impl TagGroup {
    pub fn new(id: TagGroupId, custom_type: u16) -> Self {
        Self {
            id,
            custom_type,
            tags: HashedContainer::new(),
            lifecycle: Lifecycle::new(),
            subscribers: Subscribers::new(),
            version: 0,
            saved_version: 0,
            last_tag_id: 0,
        }
    }

    /// `true` if a tag with `custom_type` already exists — tag creation
    /// rejects a duplicate `custom_type` within the tag group.
    pub fn has_custom_type(&self, custom_type: u16) -> bool {
        self.tags.any(|t| t.custom_type == custom_type)
    }

    /// Next unused tag id starting from `last_tag_id`, wrapping in
    /// `[0, 0xFFFE]` like tag-group ids do within a node.
    pub fn next_tag_id(&mut self) -> Option<TagId> {
        crate::node::next_id_in_node(&mut self.last_tag_id, |id| self.tags.contains(TagId(id)))
            .map(TagId)
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_custom_type() {
        let mut tg = TagGroup::new(TagGroupId(1), 0);
        let tag_id = tg.next_tag_id().unwrap();
        tg.tags.add(crate::tag::Tag::new(
            tag_id,
            verse_domain::types::DataType::U8,
            1,
            5,
        ));
        assert!(tg.has_custom_type(5));
        assert!(!tg.has_custom_type(6));
    }

    #[test]
    fn tag_id_allocation_starts_just_past_the_cursor() {
        let mut tg = TagGroup::new(TagGroupId(1), 0);
        assert_eq!(tg.next_tag_id(), Some(TagId(1)));
    }
}
