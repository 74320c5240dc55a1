/// Shared error type used across the verse-server workspace.
///
/// Protocol validation failures and permission failures are intentionally
/// *not* represented here — those are dropped silently with a
/// debug log at the call site, never surfaced as a `Result::Err`. This enum
/// covers the failures that *do* need to propagate: configuration, auth
/// backend plumbing, and persistence.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
