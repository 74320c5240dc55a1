//! Shared-state engine: the node graph, its lifecycle FSM, subscription
//! fan-out, command handlers, session lifecycle hooks, persistence
//! projection and the single-threaded command dispatcher.
//!
//! Everything here mutates under one conceptual lock:
//! [`dispatcher::Dispatcher`] owns a single OS thread that drains
//! every open session's inbound queue and calls straight into the `handlers`
//! module, which mutates [`node::NodeStore`] in place and pushes outgoing
//! commands onto the relevant sessions' outbound queues via `subscription`.

pub mod access;
pub mod ack_router;
pub mod bootstrap;
pub mod container;
pub mod dispatcher;
pub mod entity;
pub mod handlers;
pub mod layer;
pub mod link;
pub mod node;
pub mod persistence;
pub mod session_lifecycle;
pub mod subscribers;
pub mod subscription;
pub mod tag;
pub mod taggroup;
