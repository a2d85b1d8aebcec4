use std::time::Duration;

use thiserror::Error;

use corvid_protocol::{ProtocolError, ResponseError, RpcStatus, TaskId};
use corvid_state::StateError;

use crate::events::CloseReason;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("RPC failed: {0}")]
    Status(#[from] RpcStatus),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The task failed; the reason was logged by the event consumer.
    #[error("Task {0} produced no result")]
    NoResult(TaskId),

    #[error("Event stream stopped ({0:?})")]
    EventsStopped(Option<CloseReason>),
}

impl From<ResponseError> for ClientError {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Status(status) => ClientError::Status(status),
            ResponseError::Protocol(e) => ClientError::Protocol(e),
        }
    }
}

impl ClientError {
    /// Status code of a server-side rejection, if this is one.
    pub fn status(&self) -> Option<&RpcStatus> {
        match self {
            ClientError::Status(status) => Some(status),
            _ => None,
        }
    }
}
