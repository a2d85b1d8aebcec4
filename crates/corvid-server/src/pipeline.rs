//! Ordered interceptor pipeline wrapped around every call.
//!
//! Stages see the call on the way in (`on_request`, in order) and the outcome
//! on the way out (`on_response`, in reverse). A stage that rejects the call
//! short-circuits the rest; only the stages that already admitted it observe
//! the rejection.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use corvid_protocol::RpcStatus;

use crate::auth::CallContext;

/// Remote end of a client connection.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    /// Common name of the client certificate, when the channel carries one.
    pub common_name: Option<String>,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, common_name: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    Stream,
}

/// One inbound call as it moves through the pipeline.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: Option<String>,
    pub method: String,
    pub params: serde_json::Value,
    pub metadata: BTreeMap<String, String>,
    pub peer: PeerInfo,
    /// Set by the auth stage; never changed afterwards.
    pub context: Option<CallContext>,
    pub tags: BTreeMap<String, String>,
    pub kind: CallKind,
    pub started: Instant,
}

impl Call {
    pub fn unary(
        id: Option<String>,
        method: impl Into<String>,
        params: serde_json::Value,
        metadata: BTreeMap<String, String>,
        peer: PeerInfo,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            metadata,
            peer,
            context: None,
            tags: BTreeMap::new(),
            kind: CallKind::Unary,
            started: Instant::now(),
        }
    }

    pub fn stream(
        id: Option<String>,
        method: impl Into<String>,
        params: serde_json::Value,
        metadata: BTreeMap<String, String>,
        peer: PeerInfo,
    ) -> Self {
        Self {
            kind: CallKind::Stream,
            ..Self::unary(id, method, params, metadata, peer)
        }
    }

    /// Operator the call was attributed to, or "" before authentication.
    pub fn operator(&self) -> &str {
        self.context.as_ref().map(|c| c.operator.as_str()).unwrap_or("")
    }
}

pub type CallOutcome = Result<serde_json::Value, RpcStatus>;

#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, _call: &mut Call) -> Result<(), RpcStatus> {
        Ok(())
    }

    fn on_response(&self, _call: &Call, _outcome: &CallOutcome) {}
}

/// Terminal stage that produces the call result.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, call: &Call) -> CallOutcome;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: Arc<dyn Interceptor>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every `on_request` hook. On rejection the stages that already
    /// admitted the call see the error through `on_response`.
    pub async fn admit(&self, call: &mut Call) -> Result<(), RpcStatus> {
        for (idx, stage) in self.stages.iter().enumerate() {
            if let Err(status) = stage.on_request(call).await {
                tracing::debug!(
                    stage = stage.name(),
                    method = %call.method,
                    code = %status.code,
                    "Call rejected"
                );
                let outcome: CallOutcome = Err(status.clone());
                for passed in self.stages[..idx].iter().rev() {
                    passed.on_response(call, &outcome);
                }
                return Err(status);
            }
        }
        Ok(())
    }

    /// Deliver the outcome of an admitted call to every stage, innermost first.
    pub fn complete(&self, call: &Call, outcome: &CallOutcome) {
        for stage in self.stages.iter().rev() {
            stage.on_response(call, outcome);
        }
    }

    /// Admit, dispatch to `handler`, complete.
    pub async fn run<H: Handler + ?Sized>(&self, mut call: Call, handler: &H) -> CallOutcome {
        self.admit(&mut call).await?;
        let outcome = handler.handle(&call).await;
        self.complete(&call, &outcome);
        outcome
    }
}

/// Copies identifying request fields (`*_id`, `name`) into call tags.
#[derive(Debug, Default)]
pub struct TagInterceptor;

const TAG_DEPTH: usize = 2;

impl TagInterceptor {
    fn collect(value: &serde_json::Value, depth: usize, tags: &mut BTreeMap<String, String>) {
        let serde_json::Value::Object(map) = value else {
            return;
        };
        for (key, v) in map {
            if key.ends_with("_id") || key == "name" {
                match v {
                    serde_json::Value::String(s) if !s.is_empty() => {
                        tags.entry(key.clone()).or_insert_with(|| s.clone());
                    }
                    serde_json::Value::Number(n) => {
                        tags.entry(key.clone()).or_insert_with(|| n.to_string());
                    }
                    _ => {}
                }
            } else if depth > 1 {
                Self::collect(v, depth - 1, tags);
            }
        }
    }
}

#[async_trait]
impl Interceptor for TagInterceptor {
    fn name(&self) -> &'static str {
        "tags"
    }

    async fn on_request(&self, call: &mut Call) -> Result<(), RpcStatus> {
        let mut tags = std::mem::take(&mut call.tags);
        Self::collect(&call.params, TAG_DEPTH, &mut tags);
        call.tags = tags;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(params: serde_json::Value) -> Call {
        Call::unary(
            Some("1".into()),
            "corvid.submit",
            params,
            BTreeMap::new(),
            PeerInfo::new("127.0.0.1:9000".parse().unwrap()),
        )
    }

    #[tokio::test]
    async fn tags_pick_up_nested_ids() {
        let mut c = call(json!({"request": {"session_id": "S1", "name": "whoami", "args": ["a"]}}));
        TagInterceptor.on_request(&mut c).await.unwrap();
        assert_eq!(c.tags.get("session_id").map(String::as_str), Some("S1"));
        assert_eq!(c.tags.get("name").map(String::as_str), Some("whoami"));
        assert!(!c.tags.contains_key("args"));
    }

    #[tokio::test]
    async fn tags_stop_at_depth() {
        let mut c = call(json!({"a": {"b": {"task_id": 7}}}));
        TagInterceptor.on_request(&mut c).await.unwrap();
        assert!(c.tags.is_empty());

        let mut c = call(json!({"task": {"task_id": 7, "session_id": "S1"}}));
        TagInterceptor.on_request(&mut c).await.unwrap();
        assert_eq!(c.tags.get("task_id").map(String::as_str), Some("7"));
    }

    #[test]
    fn stream_call_kind() {
        let c = Call::stream(
            None,
            "corvid.events",
            serde_json::Value::Null,
            BTreeMap::new(),
            PeerInfo::new("127.0.0.1:9000".parse().unwrap()),
        );
        assert_eq!(c.kind, CallKind::Stream);
        assert_eq!(c.operator(), "");
    }
}
