use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{AUTHORIZATION_KEY, BEARER_SCHEME, JSONRPC_VERSION};
use crate::error::ProtocolError;
use crate::status::{RpcStatus, StatusCode};

/// Top-level JSON-RPC 2.0 request envelope.
/// Call metadata (the bearer credential, mostly) travels next to the params
/// so the server can authenticate before it looks at the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RpcRequest {
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            params,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach `authorization: Bearer <token>` metadata.
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.metadata.insert(
            AUTHORIZATION_KEY.to_string(),
            format!("{BEARER_SCHEME} {token}"),
        );
        self
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Option<String>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    pub fn from_status(id: Option<String>, status: &RpcStatus) -> Self {
        Self::error(id, status.code.as_i32(), status.message.clone())
    }

    /// Split the envelope into its result, turning an error member into an
    /// [`RpcStatus`].
    pub fn into_result(self) -> Result<serde_json::Value, ResponseError> {
        if let Some(err) = self.error {
            return Err(ResponseError::Status(err.into()));
        }
        self.result.ok_or_else(|| {
            ResponseError::Protocol(ProtocolError::UnexpectedResponse(
                "response carries neither result nor error".into(),
            ))
        })
    }
}

/// Failure to extract a result from a response envelope.
#[derive(Debug)]
pub enum ResponseError {
    Status(RpcStatus),
    Protocol(ProtocolError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<RpcError> for RpcStatus {
    fn from(err: RpcError) -> Self {
        RpcStatus::new(StatusCode::from_i32(err.code), err.message)
    }
}

// ── Specific Message Payloads ──

/// Parameters of `corvid.submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
    pub request: crate::types::TaskRequest,
}

/// Parameters of `corvid.get_task_content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContentParams {
    pub task: crate::types::TaskRef,
}

/// Parameters of `corvid.get_session` and `corvid.get_tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParams {
    pub session_id: String,
}

/// Parameters of `corvid.broadcast`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastParams {
    pub message: String,
}

/// Acknowledgement written once before the event stream starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeAck {
    pub subscribed: bool,
    pub operator: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_metadata_uses_scheme_prefix() {
        let req = RpcRequest::new("corvid.get_sessions", serde_json::json!({})).with_bearer("abc");
        assert_eq!(req.metadata.get("authorization").map(String::as_str), Some("Bearer abc"));
    }

    #[test]
    fn metadata_omitted_when_empty() {
        let req = RpcRequest::new("corvid.get_sessions", serde_json::Value::Null);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn error_response_converts_to_status() {
        let resp = RpcResponse::error(Some("1".into()), 16, "Authentication failure".into());
        match resp.into_result() {
            Err(ResponseError::Status(status)) => {
                assert_eq!(status.code, StatusCode::Unauthenticated);
                assert_eq!(status.message, "Authentication failure");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn empty_response_is_protocol_error() {
        let resp = RpcResponse {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            result: None,
            error: None,
        };
        assert!(matches!(resp.into_result(), Err(ResponseError::Protocol(_))));
    }
}
