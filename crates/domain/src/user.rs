//! User accounts and the two reserved "fake" users.
//!
//! `SUPER_USER` owns the system node skeleton; `OTHER_USERS` is the wildcard
//! principal consulted when a node's permission list has no entry for the
//! requesting user. Neither appears in the user directory loaded from the
//! auth backend — these are fake accounts, and `UserDirectory`
//! implementations never produce their ids.

use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// Owner of `root`, `avatar-parent`, `user-parent` and `scene-parent`.
pub const SUPER_USER_UID: UserId = UserId(100);

/// Wildcard principal consulted as the permission fallback.
pub const OTHER_USERS_UID: UserId = UserId(101);

/// A real, authenticated user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub realname: String,
    /// Opaque credential as stored by the auth backend (e.g. a password
    /// hash or a CSV plaintext field). Never logged.
    pub credential: String,
}

impl User {
    pub fn is_fake(&self) -> bool {
        self.user_id == SUPER_USER_UID || self.user_id == OTHER_USERS_UID
    }
}

/// Read-only directory of known user accounts, as populated by whichever
/// auth backend is configured (CSV, LDAP, ...). The core only ever needs
/// lookups by id; `authenticate` is the separate, write-adjacent operation
/// the gateway's auth backend performs before a session exists at all.
pub trait UserDirectory: Send + Sync {
    fn find(&self, user_id: UserId) -> Option<User>;
    fn find_by_username(&self, username: &str) -> Option<User>;
    fn all(&self) -> Vec<User>;
}

/// In-memory directory, used by tests and as the backing store for the CSV
/// auth backend once it has parsed its file.
#[derive(Debug, Default, Clone)]
pub struct StaticUserDirectory {
    users: Vec<User>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn find(&self, user_id: UserId) -> Option<User> {
        self.users.iter().find(|u| u.user_id == user_id).cloned()
    }

    fn find_by_username(&self, username: &str) -> Option<User> {
        self.users
            .iter()
            .find(|u| u.username == username)
            .cloned()
    }

    fn all(&self) -> Vec<User> {
        self.users.clone()
    }
}
