use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use corvid_protocol::{StatusCode, AUTHORIZATION_KEY};
use corvid_server::audit::MemoryAuditSink;
use corvid_server::operators::FileOperatorStore;
use corvid_server::{ServerConfig, ServerState};

fn bearer(token: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(AUTHORIZATION_KEY.to_string(), format!("Bearer {token}"));
    metadata
}

/// Server backed by an operator file, with `alice` already authenticated
/// once so the identity sits in the cache.
async fn cached_alice(dir: &tempfile::TempDir) -> (Arc<ServerState>, String) {
    let path = dir.path().join("operators.json");
    let (_, token) = FileOperatorStore::new(&path).add_operator("alice").await.unwrap();
    let config = ServerConfig {
        remote_auth: true,
        operators_path: path.clone(),
        ..ServerConfig::default()
    };
    let state = Arc::new(ServerState::new(
        config,
        Arc::new(FileOperatorStore::new(&path)),
        Arc::new(MemoryAuditSink::new()),
    ));
    let ctx = state.authenticator.authenticate(&bearer(&token)).await.unwrap();
    assert_eq!(ctx.operator, "alice");
    (state, token)
}

/// Removal through a separate store handle, as the operator CLI does.
async fn remove_alice(state: &ServerState) {
    let store = FileOperatorStore::new(&state.config.operators_path);
    assert!(store.remove_operator("alice").await.unwrap());
}

#[tokio::test]
async fn test_removed_operator_stays_cached_until_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let (state, token) = cached_alice(&dir).await;
    remove_alice(&state).await;

    assert!(state.authenticator.authenticate(&bearer(&token)).await.is_ok());

    state.clear_token_cache();
    let err = state.authenticator.authenticate(&bearer(&token)).await.unwrap_err();
    assert_eq!(err.code, StatusCode::Unauthenticated);
}

#[cfg(unix)]
#[tokio::test]
async fn test_hangup_revokes_removed_operator() {
    let dir = tempfile::tempdir().unwrap();
    let (state, token) = cached_alice(&dir).await;
    let handler = corvid_server::spawn_hangup_handler(Arc::clone(&state)).unwrap();
    remove_alice(&state).await;
    assert!(state.authenticator.authenticate(&bearer(&token)).await.is_ok());

    let status = std::process::Command::new("kill")
        .args(["-HUP", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let mut revoked = false;
    for _ in 0..200 {
        if state.authenticator.authenticate(&bearer(&token)).await.is_err() {
            revoked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(revoked, "token still accepted after SIGHUP");
    handler.abort();
}
