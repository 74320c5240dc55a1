//! Structured trace events emitted across the verse-server workspace.
//!
//! Mirrors every observable behaviour in the object graph (entity
//! lifecycle transitions, subscription fan-out, lock handling) so a test or
//! an operator can follow a scenario from the logs alone.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    EntityCreated {
        kind: &'static str,
        id: u32,
        node_id: u32,
    },
    EntityStateChanged {
        kind: &'static str,
        id: u32,
        from: &'static str,
        to: &'static str,
    },
    FollowerCreateSent {
        kind: &'static str,
        id: u32,
        session_id: u64,
    },
    FollowerDestroySent {
        kind: &'static str,
        id: u32,
        session_id: u64,
    },
    FollowerDestroyDeferred {
        kind: &'static str,
        id: u32,
        session_id: u64,
    },
    EntityReclaimed {
        kind: &'static str,
        id: u32,
    },
    SubscribeDenied {
        node_id: u32,
        session_id: u64,
        reason: &'static str,
    },
    CommandDropped {
        opcode: &'static str,
        session_id: u64,
        reason: &'static str,
    },
    NodeLocked {
        node_id: u32,
        session_id: u64,
    },
    NodeUnlocked {
        node_id: u32,
        session_id: u64,
    },
    SessionDisconnected {
        session_id: u64,
        avatar_id: u32,
    },
    PersistenceFlushed {
        nodes_written: usize,
        duration_ms: u64,
    },
    PersistenceFailed {
        node_id: u32,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::debug!(trace_event = %json, "verse_event");
    }
}
