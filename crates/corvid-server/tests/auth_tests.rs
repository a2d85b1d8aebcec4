use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use corvid_protocol::{Operator, StatusCode, AUTHORIZATION_KEY};
use corvid_server::auth::{AuthInterceptor, Authenticator, Transport};
use corvid_server::identity::IdentityCache;
use corvid_server::operators::{MemoryOperatorStore, OperatorStore};
use corvid_server::pipeline::{Call, Interceptor, PeerInfo};
use corvid_server::ServerError;

/// Operator store that counts lookups and can be told to fail.
#[derive(Default)]
struct CountingStore {
    inner: MemoryOperatorStore,
    lookups: AtomicUsize,
    broken: AtomicBool,
}

impl CountingStore {
    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperatorStore for CountingStore {
    async fn operator_by_token(&self, digest: &str) -> Result<Option<Operator>, ServerError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(ServerError::Store("database unavailable".into()));
        }
        self.inner.operator_by_token(digest).await
    }
}

fn bearer(token: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(AUTHORIZATION_KEY.to_string(), format!("Bearer {token}"));
    metadata
}

fn setup() -> (Arc<CountingStore>, Arc<IdentityCache>, Authenticator) {
    let store = Arc::new(CountingStore::default());
    let cache = Arc::new(IdentityCache::new());
    let auth = Authenticator::from_config(true, Arc::clone(&cache), store.clone());
    (store, cache, auth)
}

#[tokio::test]
async fn test_cached_token_skips_store() {
    let (store, cache, auth) = setup();
    store.inner.insert_with_token("alice", "tok-alice");

    let first = auth.authenticate(&bearer("tok-alice")).await.unwrap();
    assert_eq!(first.operator, "alice");
    assert_eq!(first.transport, Transport::Mtls);
    assert_eq!(store.lookups(), 1);
    assert_eq!(cache.len(), 1);

    let second = auth.authenticate(&bearer("tok-alice")).await.unwrap();
    assert_eq!(second.operator, "alice");
    assert_eq!(store.lookups(), 1);
}

#[tokio::test]
async fn test_clear_forces_exactly_one_lookup() {
    let (store, _cache, auth) = setup();
    store.inner.insert_with_token("alice", "tok-alice");

    auth.authenticate(&bearer("tok-alice")).await.unwrap();
    auth.clear_token_cache();
    auth.authenticate(&bearer("tok-alice")).await.unwrap();
    auth.authenticate(&bearer("tok-alice")).await.unwrap();
    assert_eq!(store.lookups(), 2);
}

#[tokio::test]
async fn test_revocation_takes_effect_after_clear() {
    let (store, _cache, auth) = setup();
    store.inner.insert_with_token("alice", "tok-alice");
    auth.authenticate(&bearer("tok-alice")).await.unwrap();

    store.inner.remove("alice");
    // Still cached.
    assert!(auth.authenticate(&bearer("tok-alice")).await.is_ok());

    auth.clear_token_cache();
    let err = auth.authenticate(&bearer("tok-alice")).await.unwrap_err();
    assert_eq!(err.code, StatusCode::Unauthenticated);
}

#[tokio::test]
async fn test_unknown_token_is_not_cached() {
    let (store, cache, auth) = setup();
    let err = auth.authenticate(&bearer("nope")).await.unwrap_err();
    assert_eq!(err.code, StatusCode::Unauthenticated);
    assert_eq!(err.message, "Authentication failure");
    assert!(cache.is_empty());

    auth.authenticate(&bearer("nope")).await.unwrap_err();
    assert_eq!(store.lookups(), 2);
}

#[tokio::test]
async fn test_store_failure_is_unauthenticated() {
    let (store, cache, auth) = setup();
    store.inner.insert_with_token("alice", "tok-alice");
    store.broken.store(true, Ordering::SeqCst);

    let err = auth.authenticate(&bearer("tok-alice")).await.unwrap_err();
    assert_eq!(err.code, StatusCode::Unauthenticated);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_missing_or_malformed_credentials() {
    let (store, _cache, auth) = setup();
    store.inner.insert_with_token("alice", "tok-alice");

    let mut wrong_scheme = BTreeMap::new();
    wrong_scheme.insert(AUTHORIZATION_KEY.to_string(), "Basic tok-alice".to_string());

    for metadata in [BTreeMap::new(), wrong_scheme, bearer("")] {
        let err = auth.authenticate(&metadata).await.unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
    }
    assert_eq!(store.lookups(), 0);
}

#[tokio::test]
async fn test_local_mode_attributes_server_operator() {
    let store = Arc::new(CountingStore::default());
    let auth = Authenticator::from_config(false, Arc::new(IdentityCache::new()), store.clone());
    let ctx = auth.authenticate(&BTreeMap::new()).await.unwrap();
    assert_eq!(ctx.operator, "server");
    assert_eq!(ctx.transport, Transport::Local);
    assert_eq!(store.lookups(), 0);
}

#[tokio::test]
async fn test_interceptor_attaches_context() {
    let (store, _cache, auth) = setup();
    store.inner.insert_with_token("bob", "tok-bob");
    let interceptor = AuthInterceptor::new(Arc::new(auth));

    let mut call = Call::unary(
        Some("1".into()),
        "corvid.get_sessions",
        serde_json::json!({}),
        bearer("tok-bob"),
        PeerInfo::new("127.0.0.1:4000".parse().unwrap()),
    );
    interceptor.on_request(&mut call).await.unwrap();
    assert_eq!(call.operator(), "bob");
}
