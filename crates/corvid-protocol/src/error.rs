use thiserror::Error;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}
