//! Per-connection session state for the verse-server workspace.
//!
//! A `Session` owns its inbound queue (drained by the data thread) and
//! priority outbound queue (drained by transport workers); the
//! `SessionStore` is the registry the dispatcher and the session lifecycle
//! hooks look sessions up through. Node-graph bookkeeping — follower and
//! subscriber lists, locks — lives in `verse-core`, which only ever holds a
//! `SessionId` and borrows the session back from this store.

pub mod lifecycle;
pub mod queue;
pub mod session;
pub mod store;

pub use lifecycle::IdleSweep;
pub use queue::{InboundQueue, PriorityOutQueue, DEFAULT_PRIORITY};
pub use session::{Session, SessionState};
pub use store::SessionStore;

/// Errors raised by session-local queueing. Anything about the session
/// *itself* being gone, denied, or torn down belongs in
/// [`verse_domain::Error`]; this only covers the queue-admission decision
/// `InboundQueue` makes under [`verse_domain::config::FlowControlMode::Disconnect`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("inbound queue full and flow-control mode is Disconnect")]
    QueueFull,
}
