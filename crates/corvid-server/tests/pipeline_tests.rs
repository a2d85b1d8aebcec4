use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::Level;

use corvid_protocol::{BeaconRecord, RpcStatus, SessionRecord, StatusCode, AUTHORIZATION_KEY};
use corvid_server::audit::MemoryAuditSink;
use corvid_server::logging::code_to_level;
use corvid_server::operators::MemoryOperatorStore;
use corvid_server::pipeline::{Call, CallOutcome, Handler, Interceptor, PeerInfo, Pipeline};
use corvid_server::{ServerConfig, ServerState};

#[test]
fn test_severity_table() {
    let info = [
        StatusCode::Ok,
        StatusCode::Canceled,
        StatusCode::InvalidArgument,
        StatusCode::NotFound,
        StatusCode::AlreadyExists,
        StatusCode::Unauthenticated,
    ];
    let warn = [
        StatusCode::DeadlineExceeded,
        StatusCode::PermissionDenied,
        StatusCode::ResourceExhausted,
        StatusCode::FailedPrecondition,
        StatusCode::Aborted,
        StatusCode::OutOfRange,
        StatusCode::Unavailable,
    ];
    let error = [
        StatusCode::Unknown,
        StatusCode::Unimplemented,
        StatusCode::Internal,
        StatusCode::DataLoss,
    ];
    for code in info {
        assert_eq!(code_to_level(code), Level::INFO, "{code}");
    }
    for code in warn {
        assert_eq!(code_to_level(code), Level::WARN, "{code}");
    }
    for code in error {
        assert_eq!(code_to_level(code), Level::ERROR, "{code}");
    }
    assert_eq!(info.len() + warn.len() + error.len(), 17);
}

/// Records hook invocations into a shared journal.
struct Recorder {
    name: &'static str,
    reject: bool,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Interceptor for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn on_request(&self, _call: &mut Call) -> Result<(), RpcStatus> {
        self.journal.lock().unwrap().push(format!("{}:request", self.name));
        if self.reject {
            return Err(RpcStatus::unauthenticated("no"));
        }
        Ok(())
    }

    fn on_response(&self, _call: &Call, outcome: &CallOutcome) {
        let tag = if outcome.is_ok() { "ok" } else { "err" };
        self.journal.lock().unwrap().push(format!("{}:{tag}", self.name));
    }
}

struct Echo(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, call: &Call) -> CallOutcome {
        self.0.lock().unwrap().push("handler".into());
        Ok(call.params.clone())
    }
}

fn call(metadata: BTreeMap<String, String>, params: serde_json::Value, method: &str) -> Call {
    Call::unary(
        Some("1".into()),
        method,
        params,
        metadata,
        PeerInfo::new("10.0.0.7:41000".parse().unwrap()),
    )
}

fn stage(name: &'static str, reject: bool, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
    Arc::new(Recorder { name, reject, journal: Arc::clone(journal) })
}

#[tokio::test]
async fn test_pipeline_order_and_unwind() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new()
        .with(stage("a", false, &journal))
        .with(stage("b", false, &journal));

    let outcome = pipeline
        .run(call(BTreeMap::new(), serde_json::json!(1), "m"), &Echo(Arc::clone(&journal)))
        .await;
    assert_eq!(outcome.unwrap(), serde_json::json!(1));
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["a:request", "b:request", "handler", "b:ok", "a:ok"]
    );
}

#[tokio::test]
async fn test_rejection_short_circuits() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new()
        .with(stage("a", false, &journal))
        .with(stage("b", true, &journal))
        .with(stage("c", false, &journal));

    let err = pipeline
        .run(call(BTreeMap::new(), serde_json::Value::Null, "m"), &Echo(Arc::clone(&journal)))
        .await
        .unwrap_err();
    assert_eq!(err.code, StatusCode::Unauthenticated);
    assert_eq!(*journal.lock().unwrap(), vec!["a:request", "b:request", "a:err"]);
}

async fn remote_state() -> (Arc<ServerState>, Arc<MemoryAuditSink>) {
    let store = Arc::new(MemoryOperatorStore::new());
    store.insert_with_token("alice", "tok-alice");
    let sink = Arc::new(MemoryAuditSink::new());
    let config = ServerConfig { remote_auth: true, ..ServerConfig::default() };
    let state = Arc::new(ServerState::new(config, store, sink.clone()));
    state.register_session(SessionRecord::new("S1", "alpha")).await;
    (state, sink)
}

fn alice() -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(AUTHORIZATION_KEY.to_string(), "Bearer tok-alice".to_string());
    metadata
}

#[tokio::test]
async fn test_stage_composition() {
    let (state, _) = remote_state().await;
    assert_eq!(state.unary.stage_names(), vec!["auth", "audit", "tags", "log"]);
    assert_eq!(state.stream.stage_names(), vec!["auth", "tags", "log"]);
}

#[tokio::test]
async fn test_audit_record_correlates_session() {
    let (state, sink) = remote_state().await;
    let params = serde_json::json!({"request": {"session_id": "S1", "name": "whoami"}});
    let handle = state
        .unary
        .run(call(alice(), params, "corvid.submit"), &*state)
        .await
        .unwrap();
    assert_eq!(handle["task_id"], 1);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.method, "corvid.submit");
    assert_eq!(record.operator, "alice");
    assert_eq!(record.user, "");
    assert_eq!(record.remote_ip, "10.0.0.7:41000");
    assert!(record.request.contains("whoami"));
    let session: serde_json::Value =
        serde_json::from_str(record.session.as_deref().unwrap()).unwrap();
    assert_eq!(session["session_id"], "S1");
    assert!(record.beacon.is_none());
}

#[tokio::test]
async fn test_audit_record_correlates_beacon() {
    let (state, sink) = remote_state().await;
    state.register_beacon(BeaconRecord::new("B1", "bravo", 60)).await;

    // A submit names its target in session_id even when it is a beacon.
    let params = serde_json::json!({"request": {"session_id": "B1", "name": "ps"}});
    let handle = state
        .unary
        .run(call(alice(), params, "corvid.submit"), &*state)
        .await
        .unwrap();
    assert_eq!(handle["session_id"], "B1");
    // An explicit beacon_id is correlated too.
    let params = serde_json::json!({"request": {"beacon_id": "B1"}});
    state
        .unary
        .run(call(alice(), params, "corvid.get_beacons"), &*state)
        .await
        .unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(record.session.is_none());
        let beacon: serde_json::Value =
            serde_json::from_str(record.beacon.as_deref().unwrap()).unwrap();
        assert_eq!(beacon["beacon_id"], "B1");
        assert_eq!(beacon["name"], "bravo");
        assert_eq!(beacon["interval_secs"], 60);
    }
}

#[tokio::test]
async fn test_audit_never_blocks_call() {
    let (state, sink) = remote_state().await;
    // No request body to correlate, unknown target: still audited, call proceeds.
    let outcome = state
        .unary
        .run(call(alice(), serde_json::json!("opaque"), "corvid.get_sessions"), &*state)
        .await;
    assert!(outcome.is_ok());
    let params = serde_json::json!({"request": {"session_id": "S404", "name": "ls"}});
    let err = state
        .unary
        .run(call(alice(), params, "corvid.submit"), &*state)
        .await
        .unwrap_err();
    assert_eq!(err.code, StatusCode::NotFound);

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.session.is_none()));
}

#[tokio::test]
async fn test_unauthenticated_call_is_not_audited() {
    let (state, sink) = remote_state().await;
    let err = state
        .unary
        .run(call(BTreeMap::new(), serde_json::json!({}), "corvid.get_sessions"), &*state)
        .await
        .unwrap_err();
    assert_eq!(err.code, StatusCode::Unauthenticated);
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_unknown_method_is_unimplemented() {
    let (state, _) = remote_state().await;
    let err = state
        .unary
        .run(call(alice(), serde_json::json!({}), "corvid.nope"), &*state)
        .await
        .unwrap_err();
    assert_eq!(err.code, StatusCode::Unimplemented);
}
