//! CSV user-auth backend.
//!
//! File format (one header line, then one row per user):
//! `username,password,UID,real name`. Duplicate-username and duplicate-UID
//! rows are skipped with a warning rather than rejecting the whole file.

use std::path::Path;

use verse_domain::ids::UserId;
use verse_domain::user::{StaticUserDirectory, User};
use verse_domain::{Error, Result};

use super::{AuthBackend, Denied};

const HEADER: &str = "username,password,UID,real name";

pub struct CsvAuthBackend {
    users: Vec<User>,
}

impl CsvAuthBackend {
    /// Parse a CSV user file, tolerating malformed rows (skip, keep going)
    /// but surfacing a hard error if the header line itself doesn't match —
    /// an empty or completely wrong file is a config error, not a per-row
    /// oddity.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut lines = raw.lines();

        let header = lines.next().unwrap_or_default().trim();
        if header != HEADER {
            return Err(Error::Config(format!(
                "{}: expected header `{HEADER}`, found `{header}`",
                path.display()
            )));
        }

        let mut users: Vec<User> = Vec::new();
        for (lineno, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(4, ',');
            let (Some(username), Some(password), Some(uid_str), Some(realname)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                tracing::warn!(line = lineno + 2, "csv auth: malformed row, skipped");
                continue;
            };
            let Ok(uid) = uid_str.trim().parse::<u16>() else {
                tracing::warn!(line = lineno + 2, uid = uid_str, "csv auth: non-numeric UID, skipped");
                continue;
            };
            let user_id = UserId(uid);

            if users.iter().any(|u: &User| u.user_id == user_id) {
                tracing::warn!(username, uid, "csv auth: duplicate UID, skipped");
                continue;
            }
            if users.iter().any(|u: &User| u.username == username) {
                tracing::warn!(username, uid, "csv auth: duplicate username, skipped");
                continue;
            }

            users.push(User {
                user_id,
                username: username.to_string(),
                realname: realname.to_string(),
                credential: password.to_string(),
            });
        }

        tracing::debug!(count = users.len(), path = %path.display(), "csv auth: accounts loaded");
        Ok(Self { users })
    }
}

impl AuthBackend for CsvAuthBackend {
    fn authenticate(&self, username: &str, password: &str) -> std::result::Result<UserId, Denied> {
        // Stop at the first username match (usernames are supposed to be
        // unique) rather than scanning the whole list for one with a
        // matching password too.
        let candidate = self.users.iter().find(|u| u.username == username);
        match candidate {
            Some(u) if u.credential == password => Ok(u.user_id),
            _ => Err(Denied),
        }
    }

    fn directory(&self) -> StaticUserDirectory {
        StaticUserDirectory::new(self.users.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use verse_domain::user::UserDirectory;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn authenticates_matching_username_and_password() {
        let f = write_csv("username,password,UID,real name\nalice,hunter2,1000,Alice Example\n");
        let backend = CsvAuthBackend::load(f.path()).unwrap();
        assert_eq!(backend.authenticate("alice", "hunter2"), Ok(UserId(1000)));
    }

    #[test]
    fn denies_wrong_password() {
        let f = write_csv("username,password,UID,real name\nalice,hunter2,1000,Alice Example\n");
        let backend = CsvAuthBackend::load(f.path()).unwrap();
        assert_eq!(backend.authenticate("alice", "wrong"), Err(Denied));
    }

    #[test]
    fn denies_unknown_username() {
        let f = write_csv("username,password,UID,real name\nalice,hunter2,1000,Alice Example\n");
        let backend = CsvAuthBackend::load(f.path()).unwrap();
        assert_eq!(backend.authenticate("bob", "hunter2"), Err(Denied));
    }

    #[test]
    fn skips_duplicate_uid_rows() {
        let f = write_csv(
            "username,password,UID,real name\nalice,hunter2,1000,Alice Example\nbob,pw,1000,Bob Example\n",
        );
        let backend = CsvAuthBackend::load(f.path()).unwrap();
        assert_eq!(backend.directory().all().len(), 1);
    }

    #[test]
    fn rejects_wrong_header() {
        let f = write_csv("name,pass\nalice,hunter2\n");
        assert!(CsvAuthBackend::load(f.path()).is_err());
    }
}
