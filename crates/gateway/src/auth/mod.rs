//! User authentication backends: the core only ever consumes
//! `authenticate(username, password) -> user_id | Denied` plus a
//! read-only [`verse_domain::user::UserDirectory`].
//!
//! CSV is the one backend implemented here; LDAP is left as an
//! unimplemented trait seam rather than guessing at its wire behavior.

pub mod csv;

use verse_domain::ids::UserId;

/// Outcome of a failed authentication attempt. Kept separate from
/// [`verse_domain::Error`] because "bad username or password" is an
/// expected, user-triggerable outcome, not a plumbing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("authentication denied")]
pub struct Denied;

/// `authenticate(username, password) -> user_id | Denied`.
pub trait AuthBackend: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Result<UserId, Denied>;

    /// The directory of real user accounts this backend knows about, used
    /// by [`verse_core::bootstrap::bootstrap`] to build one node per user.
    fn directory(&self) -> verse_domain::user::StaticUserDirectory;
}
