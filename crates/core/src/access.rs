//! Access control: per-node owner plus an ordered `(user, mask)`
//! permission list with fallback to the reserved "other users" wildcard
//! principal.

use verse_domain::ids::UserId;
use verse_domain::types::PermissionMask;
use verse_domain::user::OTHER_USERS_UID;

#[derive(Debug, Clone)]
pub struct AccessList {
    owner: UserId,
    /// Ordered so that `perm` advertisements sent on subscribe replay in
    /// the order they were set, matching what a client observed live.
    entries: Vec<(UserId, PermissionMask)>,
}

impl AccessList {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn set_owner(&mut self, owner: UserId) {
        self.owner = owner;
    }

    /// Upsert the `(user, mask)` entry.
    pub fn set_perm(&mut self, user: UserId, mask: PermissionMask) {
        if let Some(entry) = self.entries.iter_mut().find(|(u, _)| *u == user) {
            entry.1 = mask;
        } else {
            self.entries.push((user, mask));
        }
    }

    pub fn entries(&self) -> &[(UserId, PermissionMask)] {
        &self.entries
    }

    fn mask_for(&self, user: UserId) -> PermissionMask {
        if user == self.owner {
            return PermissionMask::READ | PermissionMask::WRITE;
        }
        if let Some((_, mask)) = self.entries.iter().find(|(u, _)| *u == user) {
            return *mask;
        }
        self.entries
            .iter()
            .find(|(u, _)| *u == OTHER_USERS_UID)
            .map(|(_, mask)| *mask)
            .unwrap_or(PermissionMask::empty())
    }

    pub fn can_read(&self, user: UserId) -> bool {
        self.mask_for(user).contains(PermissionMask::READ)
    }

    pub fn can_write(&self, user: UserId) -> bool {
        self.mask_for(user).contains(PermissionMask::WRITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: UserId = UserId(10);
    const ALICE: UserId = UserId(20);
    const BOB: UserId = UserId(30);

    #[test]
    fn owner_always_has_full_access() {
        let acl = AccessList::new(OWNER);
        assert!(acl.can_read(OWNER));
        assert!(acl.can_write(OWNER));
    }

    #[test]
    fn explicit_entry_overrides_other_users_fallback() {
        let mut acl = AccessList::new(OWNER);
        acl.set_perm(OTHER_USERS_UID, PermissionMask::READ);
        acl.set_perm(ALICE, PermissionMask::READ | PermissionMask::WRITE);
        assert!(acl.can_write(ALICE));
        assert!(acl.can_read(BOB));
        assert!(!acl.can_write(BOB));
    }

    #[test]
    fn no_entries_means_no_access_for_strangers() {
        let acl = AccessList::new(OWNER);
        assert!(!acl.can_read(BOB));
        assert!(!acl.can_write(BOB));
    }

    #[test]
    fn set_perm_upserts_in_place() {
        let mut acl = AccessList::new(OWNER);
        acl.set_perm(ALICE, PermissionMask::READ);
        acl.set_perm(ALICE, PermissionMask::WRITE);
        assert_eq!(acl.entries().len(), 1);
        assert!(!acl.can_read(ALICE));
        assert!(acl.can_write(ALICE));
    }
}
