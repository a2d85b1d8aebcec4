//! Corvid Protocol - Core types and message definitions
//!
//! Implements the operator-facing control-plane protocol: a newline-delimited
//! JSON-RPC 2.0 envelope, the task and agent data model, the server-pushed
//! event union, and the fault vocabulary used to classify task results.

pub mod constants;
pub mod error;
pub mod events;
pub mod fault;
pub mod messages;
pub mod status;
pub mod types;

pub use constants::*;
pub use error::*;
pub use events::*;
pub use fault::{classify, RemoteFault, TaskFailure, TaskStatusDetail, TaskStatusKind};
pub use messages::*;
pub use status::*;
pub use types::*;
