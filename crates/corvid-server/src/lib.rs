//! Corvid team server.
//!
//! Accepts newline-delimited JSON-RPC calls from operator clients, runs every
//! call through an ordered interceptor pipeline (authenticate, audit, tag,
//! log), schedules commands on the task board and pushes lifecycle and task
//! events to subscribed clients.

pub mod audit;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod operators;
pub mod pipeline;
pub mod rpc_server;
pub mod server;
pub mod tasks;

pub use config::{LogConfig, ServerConfig};
pub use error::ServerError;
pub use rpc_server::RpcServer;
pub use server::ServerState;
#[cfg(unix)]
pub use server::spawn_hangup_handler;
