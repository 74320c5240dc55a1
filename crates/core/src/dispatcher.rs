//! Single-threaded command dispatcher.
//!
//! One OS thread owns every mutation of the object graph. It suspends only
//! on the inbound wake signal (posted by transport workers whenever they
//! push onto a session's `InboundQueue`), with a 1-second timeout so
//! `CLOSING` is noticed promptly even if nothing new ever arrives. Each
//! wake drains every `Open` session's inbound queue to empty before going
//! back to sleep, then runs idle-session and persistence housekeeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use verse_domain::config::LimitsConfig;
use verse_sessions::{IdleSweep, SessionStore};

use crate::node::NodeStore;
use crate::persistence::{self, DocumentStore};
use crate::{handlers, session_lifecycle};

/// Server-wide lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Reserved,
    Conf,
    Ready,
    Closing,
    Closed,
}

impl ServerState {
    fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (ServerState::Reserved, ServerState::Conf)
                | (ServerState::Conf, ServerState::Ready)
                | (ServerState::Ready, ServerState::Closing)
                | (ServerState::Closing, ServerState::Closed)
        )
    }
}

/// Housekeeping state for the optional persistence projection; absent
/// entirely when `persistence.enabled` is false in config, in which case
/// the dispatcher never constructs a `DocumentStore`.
struct PersistenceHousekeeping {
    docs: Arc<dyn DocumentStore>,
    flush_interval: Duration,
    last_flush: Mutex<Instant>,
}

/// Owns the object graph and the one thread allowed to mutate it.
pub struct Dispatcher {
    nodes: Arc<NodeStore>,
    sessions: Arc<SessionStore>,
    state: Mutex<ServerState>,
    wake_lock: Mutex<()>,
    wake: Condvar,
    idle_sweep: IdleSweep,
    persistence: Option<PersistenceHousekeeping>,
}

impl Dispatcher {
    pub fn new(nodes: Arc<NodeStore>, sessions: Arc<SessionStore>, limits: &LimitsConfig) -> Self {
        Self {
            nodes,
            sessions,
            state: Mutex::new(ServerState::Reserved),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            idle_sweep: IdleSweep::new(limits.idle_timeout_secs),
            persistence: None,
        }
    }

    /// Enable the persistence housekeeping pass. No-op call site if
    /// `persistence.enabled` is false in config — the gateway simply never
    /// calls this.
    pub fn with_persistence(mut self, docs: Arc<dyn DocumentStore>, flush_interval: Duration) -> Self {
        self.persistence = Some(PersistenceHousekeeping {
            docs,
            flush_interval,
            last_flush: Mutex::new(Instant::now()),
        });
        self
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Wake the dispatcher immediately instead of waiting out its 1-second
    /// poll — called by a transport worker right after it pushes a command
    /// onto a session's inbound queue.
    pub fn notify(&self) {
        self.wake.notify_all();
    }

    /// Move the server from `Ready` to `Closing`; the run loop finishes
    /// draining its current wake-up and exits on the next iteration.
    pub fn request_shutdown(&self) {
        self.advance(ServerState::Closing);
        self.wake.notify_all();
    }

    fn advance(&self, next: ServerState) {
        let mut state = self.state.lock();
        if !state.can_advance_to(next) {
            panic!("illegal server-state transition {state:?} -> {next:?}");
        }
        tracing::debug!(from = ?*state, to = ?next, "server state transition");
        *state = next;
    }

    /// Run the dispatch loop until `request_shutdown` is called. Blocks
    /// the calling thread for the server's whole lifetime — callers spawn
    /// this onto its own OS thread.
    pub fn run(&self) {
        self.advance(ServerState::Conf);
        self.advance(ServerState::Ready);

        loop {
            if self.state() == ServerState::Closing {
                break;
            }

            {
                let mut guard = self.wake_lock.lock();
                self.wake.wait_for(&mut guard, Duration::from_secs(1));
            }

            if self.state() == ServerState::Closing {
                break;
            }

            self.drain_all_sessions();
            self.run_housekeeping();
        }

        self.advance(ServerState::Closed);
    }

    fn drain_all_sessions(&self) {
        for session in self.sessions.all() {
            if !session.is_open() {
                continue;
            }
            for cmd in session.in_queue.drain() {
                session.touch();
                handlers::dispatch(&self.nodes, &self.sessions, session.id, cmd);
            }
        }
    }

    fn run_housekeeping(&self) {
        for session_id in self.idle_sweep.sweep(&self.sessions) {
            tracing::debug!(session_id = %session_id, "idle session timed out");
            session_lifecycle::on_disconnect(&self.nodes, &self.sessions, session_id);
        }

        if let Some(p) = &self.persistence {
            let mut last_flush = p.last_flush.lock();
            if last_flush.elapsed() < p.flush_interval {
                return;
            }
            match persistence::flush(&self.nodes, p.docs.as_ref()) {
                Ok(_) => *last_flush = Instant::now(),
                Err(e) => tracing::warn!(error = %e, "persistence flush failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::config::FlowControlMode;

    fn fresh() -> Dispatcher {
        let nodes = Arc::new(NodeStore::new());
        crate::bootstrap::bootstrap(&nodes, &[]);
        let sessions = Arc::new(SessionStore::new(64, FlowControlMode::DropOldest));
        let limits = LimitsConfig::default();
        Dispatcher::new(nodes, sessions, &limits)
    }

    #[test]
    fn starts_reserved() {
        let dispatcher = fresh();
        assert_eq!(dispatcher.state(), ServerState::Reserved);
    }

    #[test]
    #[should_panic(expected = "illegal server-state transition")]
    fn skipping_a_state_panics() {
        let dispatcher = fresh();
        dispatcher.advance(ServerState::Ready);
    }

    #[test]
    fn request_shutdown_before_run_is_rejected_as_illegal() {
        // Shutdown is only legal from `Ready`; requesting it from `Reserved`
        // is a programming error and panics rather than silently no-opping.
        let dispatcher = fresh();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dispatcher.request_shutdown()));
        assert!(result.is_err());
    }
}
