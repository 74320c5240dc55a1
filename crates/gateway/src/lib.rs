//! Process-level wiring for the verse-server binary: CLI surface, config
//! loading, auth backends, and the pure bits of external interfaces worth
//! implementing even though transport framing itself is out of scope.
//!
//! Nothing in this crate mutates the node graph directly — it constructs
//! [`verse_core`] components and hands the dispatcher thread its run loop.

pub mod auth;
pub mod cli;
pub mod websocket;
