//! Corvid State - shared session and beacon directory.
//!
//! The directory is the in-memory index of known remote agents. The server
//! consults it from the audit interceptor and the submit handler; the client
//! keeps its own copy, refreshed from the server on demand and patched by
//! session-lifecycle events.

pub mod directory;

pub use directory::{Directory, DirectorySnapshot};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}
