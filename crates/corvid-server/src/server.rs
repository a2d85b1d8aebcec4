use std::sync::Arc;

use corvid_protocol::{BeaconRecord, Event, SessionRecord, LOCAL_OPERATOR};
use corvid_state::Directory;

use crate::audit::{AuditInterceptor, AuditSink, TracingAuditSink};
use crate::auth::{AuthInterceptor, Authenticator};
use crate::broker::EventBroker;
use crate::config::ServerConfig;
use crate::identity::IdentityCache;
use crate::logging::LogInterceptor;
use crate::operators::{FileOperatorStore, OperatorStore};
use crate::pipeline::{Pipeline, TagInterceptor};
use crate::tasks::TaskBoard;

/// Source name of notifications the server raises itself.
pub const SERVER_SOURCE: &str = "server";

/// Everything a connection handler needs, shared across connections.
pub struct ServerState {
    pub config: ServerConfig,
    pub directory: Arc<Directory>,
    pub tasks: TaskBoard,
    pub broker: EventBroker,
    pub authenticator: Arc<Authenticator>,
    pub unary: Pipeline,
    pub stream: Pipeline,
}

impl ServerState {
    /// Wire the pipelines. Unary calls run auth, audit, tags, log; the event
    /// stream skips audit.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn OperatorStore>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        let directory = Arc::new(Directory::new());
        let broker = EventBroker::new(config.event_buffer);
        let tasks = TaskBoard::new(Arc::clone(&directory), broker.clone());
        let cache = Arc::new(IdentityCache::new());
        let authenticator = Arc::new(Authenticator::from_config(config.remote_auth, cache, store));

        let auth = Arc::new(AuthInterceptor::new(Arc::clone(&authenticator)));
        let audit = Arc::new(AuditInterceptor::new(Arc::clone(&directory), audit_sink));
        let tags = Arc::new(TagInterceptor);
        let log = Arc::new(LogInterceptor::new(&config.logs));

        let unary = Pipeline::new()
            .with(auth.clone())
            .with(audit)
            .with(tags.clone())
            .with(log.clone());
        let stream = Pipeline::new().with(auth).with(tags).with(log);

        if !authenticator.is_remote() {
            tracing::warn!(
                operator = LOCAL_OPERATOR,
                "Remote auth disabled, every call is trusted"
            );
        }

        Self {
            config,
            directory,
            tasks,
            broker,
            authenticator,
            unary,
            stream,
        }
    }

    /// File-backed operators and audit to the tracing subscriber.
    pub fn from_config(config: ServerConfig) -> Self {
        let store = Arc::new(FileOperatorStore::new(config.operators_path.clone()));
        Self::new(config, store, Arc::new(TracingAuditSink))
    }

    pub async fn register_session(&self, session: SessionRecord) {
        tracing::info!(
            session_id = %session.session_id,
            name = %session.name,
            "Session registered"
        );
        self.directory.upsert_session(session.clone()).await;
        self.broker.publish(Event::SessionUpdate {
            session,
            message: "registered".to_string(),
        });
    }

    /// Beacons have no session-update payload; they are announced as a
    /// server notification instead.
    pub async fn register_beacon(&self, beacon: BeaconRecord) {
        tracing::info!(beacon_id = %beacon.beacon_id, name = %beacon.name, "Beacon registered");
        let data = format!("Beacon {} ({}) registered", beacon.name, beacon.beacon_id);
        self.directory.upsert_beacon(beacon).await;
        self.broker.publish(Event::Notify {
            source: SERVER_SOURCE.to_string(),
            data,
            err: None,
        });
    }

    pub fn broadcast(&self, source: &str, data: &str) {
        self.broker.publish(Event::Broadcast {
            source: source.to_string(),
            data: data.to_string(),
            err: None,
        });
    }

    /// Revoke every cached operator identity.
    pub fn clear_token_cache(&self) {
        self.authenticator.clear_token_cache();
    }
}

/// Clear the token cache on every SIGHUP, so operators removed from the
/// store stop authenticating without a restart.
#[cfg(unix)]
pub fn spawn_hangup_handler(
    state: Arc<ServerState>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, clearing token cache");
            state.clear_token_cache();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::operators::MemoryOperatorStore;

    fn state() -> ServerState {
        ServerState::new(
            ServerConfig::default(),
            Arc::new(MemoryOperatorStore::new()),
            Arc::new(MemoryAuditSink::new()),
        )
    }

    #[tokio::test]
    async fn session_registration_is_announced() {
        let state = state();
        let mut rx = state.broker.subscribe();
        state.register_session(SessionRecord::new("S1", "alpha")).await;
        assert!(state.directory.session("S1").await.is_some());
        match rx.recv().await.unwrap() {
            Event::SessionUpdate { session, message } => {
                assert_eq!(session.session_id, "S1");
                assert_eq!(message, "registered");
            }
            other => panic!("unexpected event {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn beacon_registration_is_announced() {
        let state = state();
        let mut rx = state.broker.subscribe();
        state.register_beacon(BeaconRecord::new("B1", "bravo", 60)).await;
        assert!(state.directory.beacon("B1").await.is_some());
        match rx.recv().await.unwrap() {
            Event::Notify { source, data, err } => {
                assert_eq!(source, SERVER_SOURCE);
                assert!(data.contains("bravo") && data.contains("B1"));
                assert!(err.is_none());
            }
            other => panic!("unexpected event {}", other.kind()),
        }
    }
}
