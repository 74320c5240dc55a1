//! A single connected client's server-side state.

use std::time::Instant;

use parking_lot::Mutex;
use verse_domain::config::FlowControlMode;
use verse_domain::ids::{NodeId, SessionId, UserId};

use crate::queue::{InboundQueue, PriorityOutQueue};

/// Transport-visible connection state. The dispatcher only services
/// sessions in [`SessionState::Open`]; `Closing`/`Closed` sessions are
/// being torn down by the session-exit hook and are skipped on the next
/// sweep once that completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Per-connection state shared between a transport worker and the data
/// thread. Sessions never own a reference into the node graph; they are
/// only ever looked up *from* follower/subscriber records by
/// [`crate::SessionId`].
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    /// Node id of this session's avatar, assigned by the session-connect
    /// hook once authentication succeeds.
    avatar_id: Mutex<Option<NodeId>>,
    state: Mutex<SessionState>,
    pub in_queue: InboundQueue,
    pub out_queue: PriorityOutQueue,
    last_active: Mutex<Instant>,
}

impl Session {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        inbound_capacity: usize,
        flow_control: FlowControlMode,
    ) -> Self {
        Self {
            id,
            user_id,
            avatar_id: Mutex::new(None),
            state: Mutex::new(SessionState::Open),
            in_queue: InboundQueue::new(inbound_capacity, flow_control),
            out_queue: PriorityOutQueue::new(),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn avatar_id(&self) -> Option<NodeId> {
        *self.avatar_id.lock()
    }

    pub fn set_avatar_id(&self, node_id: NodeId) {
        *self.avatar_id.lock() = Some(node_id);
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.lock().elapsed()
    }
}
