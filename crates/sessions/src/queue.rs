//! Per-session inbound and outbound queues.
//!
//! Inbound is a plain FIFO the dispatcher drains to empty on every wake-up.
//! Outbound is priority-ordered: `node_prio` changes the priority a session
//! applies to commands generated against one node's subtree, and the queue
//! must preserve FIFO order *within* a priority tier so that, e.g., a
//! `tag_create` is never observed after the `tag_set` that followed it at
//! the same priority.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use verse_domain::config::FlowControlMode;
use verse_protocol::Command;

use crate::SessionError;

/// FIFO queue of commands a session has sent but the dispatcher has not yet
/// drained. Bounded; behavior on overflow is governed by
/// [`FlowControlMode`].
pub struct InboundQueue {
    items: Mutex<VecDeque<Command>>,
    capacity: usize,
    mode: FlowControlMode,
}

impl InboundQueue {
    pub fn new(capacity: usize, mode: FlowControlMode) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            mode,
        }
    }

    /// Enqueue a command. Returns `Err` only under
    /// [`FlowControlMode::Disconnect`] when the queue is already full; the
    /// caller is expected to tear the session down in that case.
    pub fn push(&self, cmd: Command) -> Result<(), SessionError> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            match self.mode {
                FlowControlMode::DropOldest => {
                    items.pop_front();
                }
                FlowControlMode::Disconnect => return Err(SessionError::QueueFull),
            }
        }
        items.push_back(cmd);
        Ok(())
    }

    /// Drain every currently-queued command, oldest first. Called once per
    /// dispatcher wake-up per active session.
    pub fn drain(&self) -> Vec<Command> {
        let mut items = self.items.lock();
        items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Envelope {
    priority: u8,
    seq: u64,
    command: Command,
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Envelope {}

impl PartialOrd for Envelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Envelope {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a priority tier, lower seq (older)
        // first. `BinaryHeap` is a max-heap, so invert seq.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority-ordered outbound queue. One of these is owned per session;
/// `node_prio` affects which priority future pushes for that node's
/// subtree use, not the queue's own configuration.
pub struct PriorityOutQueue {
    items: Mutex<BinaryHeap<Envelope>>,
    next_seq: AtomicU64,
}

impl Default for PriorityOutQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityOutQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn push(&self, priority: u8, command: Command) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.items.lock().push(Envelope {
            priority,
            seq,
            command,
        });
    }

    /// Pop the single highest-priority, oldest-enqueued command. Transport
    /// workers drive this one at a time as they have socket capacity.
    pub fn pop(&self) -> Option<Command> {
        self.items.lock().pop().map(|e| e.command)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default fan-out priority applied to a freshly-subscribed node unless
/// overridden by `node_prio`.
pub const DEFAULT_PRIORITY: u8 = 0;

#[cfg(test)]
mod tests {
    use super::*;
    use verse_domain::ids::NodeId;
    use verse_protocol::{node::NodeCmd, Command};

    fn cmd(node_id: u32) -> Command {
        Command::Node(NodeCmd::Destroy {
            node_id: NodeId(node_id),
        })
    }

    #[test]
    fn higher_priority_drains_first() {
        let q = PriorityOutQueue::new();
        q.push(0, cmd(1));
        q.push(5, cmd(2));
        q.push(0, cmd(3));
        assert_eq!(q.pop().unwrap().node_id(), NodeId(2));
        assert_eq!(q.pop().unwrap().node_id(), NodeId(1));
        assert_eq!(q.pop().unwrap().node_id(), NodeId(3));
        assert!(q.pop().is_none());
    }

    #[test]
    fn inbound_drop_oldest_on_overflow() {
        let q = InboundQueue::new(2, FlowControlMode::DropOldest);
        q.push(cmd(1)).unwrap();
        q.push(cmd(2)).unwrap();
        q.push(cmd(3)).unwrap();
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].node_id(), NodeId(2));
        assert_eq!(drained[1].node_id(), NodeId(3));
    }

    #[test]
    fn inbound_disconnect_on_overflow() {
        let q = InboundQueue::new(1, FlowControlMode::Disconnect);
        q.push(cmd(1)).unwrap();
        assert!(matches!(q.push(cmd(2)), Err(SessionError::QueueFull)));
    }
}
