//! Shared domain types for the verse-server workspace.
//!
//! Nodes, users, wire data types, configuration and the error taxonomy all
//! live here so that `verse-protocol`, `verse-sessions`, `verse-core` and the
//! `verse-gateway` binary share one vocabulary instead of redefining ids and
//! enums at every crate boundary.

pub mod config;
pub mod error;
pub mod ids;
pub mod trace;
pub mod types;
pub mod user;

pub use error::{Error, Result};
