use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use corvid_protocol::{BeaconRecord, SessionRecord, TaskSummary};

use crate::StateError;

/// Immutable view of every known session and beacon.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    /// Sessions keyed by session ID.
    pub sessions: HashMap<String, SessionRecord>,
    /// Beacons keyed by beacon ID.
    pub beacons: HashMap<String, BeaconRecord>,
}

/// Session/beacon index shared between concurrent readers.
///
/// Writers never mutate a published snapshot in place: they build the next
/// one and swap it in with a single assignment, so a reader holding a
/// snapshot sees either the old or the new state in full.
#[derive(Debug, Default)]
pub struct Directory {
    current: RwLock<Arc<DirectorySnapshot>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.
    pub async fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Replace every session at once. Beacons are left untouched.
    pub async fn replace_sessions(&self, sessions: Vec<SessionRecord>) {
        let sessions: HashMap<String, SessionRecord> = sessions
            .into_iter()
            .map(|s| (s.session_id.clone(), s))
            .collect();
        let mut current = self.current.write().await;
        let next = DirectorySnapshot {
            sessions,
            beacons: current.beacons.clone(),
        };
        *current = Arc::new(next);
        tracing::debug!(sessions = current.sessions.len(), "Directory sessions replaced");
    }

    /// Replace every beacon at once. Sessions are left untouched.
    pub async fn replace_beacons(&self, beacons: Vec<BeaconRecord>) {
        let beacons: HashMap<String, BeaconRecord> = beacons
            .into_iter()
            .map(|b| (b.beacon_id.clone(), b))
            .collect();
        let mut current = self.current.write().await;
        let next = DirectorySnapshot {
            sessions: current.sessions.clone(),
            beacons,
        };
        *current = Arc::new(next);
        tracing::debug!(beacons = current.beacons.len(), "Directory beacons replaced");
    }

    /// Insert or overwrite one session.
    pub async fn upsert_session(&self, session: SessionRecord) {
        let mut current = self.current.write().await;
        let mut next = (**current).clone();
        next.sessions.insert(session.session_id.clone(), session);
        *current = Arc::new(next);
    }

    /// Insert or overwrite one beacon.
    pub async fn upsert_beacon(&self, beacon: BeaconRecord) {
        let mut current = self.current.write().await;
        let mut next = (**current).clone();
        next.beacons.insert(beacon.beacon_id.clone(), beacon);
        *current = Arc::new(next);
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.current.read().await.sessions.get(session_id).cloned()
    }

    pub async fn beacon(&self, beacon_id: &str) -> Option<BeaconRecord> {
        self.current.read().await.beacons.get(beacon_id).cloned()
    }

    /// All sessions, ordered by session ID.
    pub async fn sessions(&self) -> Vec<SessionRecord> {
        let snapshot = self.snapshot().await;
        let mut sessions: Vec<SessionRecord> = snapshot.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub async fn alive_sessions(&self) -> Vec<SessionRecord> {
        let mut sessions = self.sessions().await;
        sessions.retain(|s| s.alive);
        sessions
    }

    /// All beacons, ordered by beacon ID.
    pub async fn beacons(&self) -> Vec<BeaconRecord> {
        let snapshot = self.snapshot().await;
        let mut beacons: Vec<BeaconRecord> = snapshot.beacons.values().cloned().collect();
        beacons.sort_by(|a, b| a.beacon_id.cmp(&b.beacon_id));
        beacons
    }

    /// Whether `agent_id` names a known session or beacon.
    pub async fn contains_agent(&self, agent_id: &str) -> bool {
        let current = self.current.read().await;
        current.sessions.contains_key(agent_id) || current.beacons.contains_key(agent_id)
    }

    /// Append a task to the history of the session or beacon `agent_id`.
    pub async fn record_task(
        &self,
        agent_id: &str,
        summary: TaskSummary,
    ) -> Result<(), StateError> {
        self.modify_tasks(agent_id, |tasks| tasks.push(summary)).await
    }

    /// Mark a task in an agent's history as finished.
    pub async fn finish_task(&self, agent_id: &str, task_id: u32) -> Result<(), StateError> {
        self.modify_tasks(agent_id, |tasks| {
            if let Some(entry) = tasks.iter_mut().find(|t| t.task_id == task_id) {
                entry.finished = true;
            }
        })
        .await
    }

    /// Overwrite the task history of a session or beacon.
    pub async fn set_tasks(
        &self,
        agent_id: &str,
        tasks: Vec<TaskSummary>,
    ) -> Result<(), StateError> {
        self.modify_tasks(agent_id, move |current| *current = tasks).await
    }

    async fn modify_tasks<F>(&self, agent_id: &str, f: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut Vec<TaskSummary>),
    {
        let mut current = self.current.write().await;
        let mut next = (**current).clone();
        if let Some(session) = next.sessions.get_mut(agent_id) {
            f(&mut session.tasks);
        } else if let Some(beacon) = next.beacons.get_mut(agent_id) {
            f(&mut beacon.tasks);
        } else {
            return Err(StateError::UnknownAgent(agent_id.to_string()));
        }
        *current = Arc::new(next);
        Ok(())
    }
}
