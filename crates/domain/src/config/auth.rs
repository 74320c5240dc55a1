use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth config
//
// Credential verification itself (how a password/token is checked) is an
// external collaborator. This selects *which* user directory the gateway
// consults (`csv` or `static`, the latter a fixed two-user set used in
// the test scenarios).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthBackend {
    /// One `username,realname,password_hash` line per user.
    Csv { path: PathBuf },
    /// A fixed in-memory directory, useful for tests and `verse-server
    /// doctor` dry runs.
    Static,
}

impl Default for AuthBackend {
    fn default() -> Self {
        AuthBackend::Csv {
            path: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub backend: AuthBackend,

    /// Configurable override for the fake super-user and other-users ids;
    /// defaults match [`crate::user::SUPER_USER_UID`] and
    /// [`crate::user::OTHER_USERS_UID`].
    #[serde(default = "d_super_user_uid")]
    pub super_user_uid: u16,

    #[serde(default = "d_other_users_uid")]
    pub other_users_uid: u16,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: AuthBackend::default(),
            super_user_uid: d_super_user_uid(),
            other_users_uid: d_other_users_uid(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────
fn d_super_user_uid() -> u16 {
    crate::user::SUPER_USER_UID.0
}
fn d_other_users_uid() -> u16 {
    crate::user::OTHER_USERS_UID.0
}
