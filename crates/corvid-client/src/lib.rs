//! Corvid operator client.
//!
//! Issues commands through the team server, remembers which tasks still wait
//! for a result, and consumes the server event stream to deliver each result
//! to its issuer exactly once.

pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod rpc;
pub mod status;

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{CloseReason, ConsumerState, Dispatch, EventConsumer};
pub use registry::{TaskCallback, TaskRegistry};
pub use rpc::{ControlPlane, EventStream, RpcClient};
pub use status::ServerStatus;
