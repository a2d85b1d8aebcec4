use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

use corvid_protocol::{
    BeaconRecord, ClientInfo, SessionRecord, TaskContent, TaskHandle, TaskId, TaskRequest,
    TaskSummary,
};
use corvid_state::Directory;

use crate::events::{CloseReason, EventConsumer};
use crate::registry::{TaskCallback, TaskRegistry};
use crate::rpc::ControlPlane;
use crate::ClientError;

/// Client-side view of the team server: its agents, and the tasks this
/// client is waiting on.
pub struct ServerStatus {
    rpc: Arc<dyn ControlPlane>,
    directory: Arc<Directory>,
    registry: Arc<TaskRegistry>,
    clients: RwLock<Vec<ClientInfo>>,
    fetch_timeout: Duration,
}

impl ServerStatus {
    pub fn new(rpc: Arc<dyn ControlPlane>) -> Self {
        Self {
            rpc,
            directory: Arc::new(Directory::new()),
            registry: Arc::new(TaskRegistry::new()),
            clients: RwLock::new(Vec::new()),
            fetch_timeout: Duration::from_secs(corvid_protocol::TASK_FETCH_TIMEOUT_SECS),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Refresh the session list (all, or only live ones). Replaces the local
    /// copy wholesale.
    pub async fn update_sessions(&self, all: bool) -> Result<Vec<SessionRecord>, ClientError> {
        let sessions = self.rpc.sessions(all).await?;
        self.directory.replace_sessions(sessions.clone()).await;
        Ok(sessions)
    }

    pub async fn update_session(&self, session_id: &str) -> Result<SessionRecord, ClientError> {
        let session = self.rpc.session(session_id).await?;
        self.directory.upsert_session(session.clone()).await;
        Ok(session)
    }

    pub async fn update_beacons(&self) -> Result<Vec<BeaconRecord>, ClientError> {
        let beacons = self.rpc.beacons().await?;
        self.directory.replace_beacons(beacons.clone()).await;
        Ok(beacons)
    }

    /// Refresh the task history of one session or beacon.
    pub async fn update_tasks(&self, session_id: &str) -> Result<Vec<TaskSummary>, ClientError> {
        let tasks = self.rpc.tasks(session_id).await?;
        self.directory.set_tasks(session_id, tasks.clone()).await?;
        Ok(tasks)
    }

    /// Refresh the list of operators connected to the server.
    pub async fn update_clients(&self) -> Result<Vec<ClientInfo>, ClientError> {
        let clients = self.rpc.clients().await?;
        *self.clients.write().await = clients.clone();
        Ok(clients)
    }

    /// Operators seen by the last [`ServerStatus::update_clients`].
    pub async fn clients(&self) -> Vec<ClientInfo> {
        self.clients.read().await.clone()
    }

    pub fn add_callback(&self, task_id: TaskId, callback: TaskCallback) {
        self.registry.register(task_id, callback);
    }

    pub fn cancel_callback(&self, task_id: TaskId) -> bool {
        self.registry.cancel(task_id)
    }

    /// Submit `request` and register `callback` for its result.
    ///
    /// The callback is registered after the server answers, so a result that
    /// arrives before registration is not delivered.
    pub async fn issue(
        &self,
        request: TaskRequest,
        callback: TaskCallback,
    ) -> Result<TaskHandle, ClientError> {
        let handle = self.rpc.submit(request).await?;
        self.registry.register(handle.task_id, callback);
        tracing::debug!(task_id = handle.task_id, session_id = %handle.session_id, "Task issued");
        Ok(handle)
    }

    /// Submit `request` and wait up to `wait` for its content.
    ///
    /// Gives up as soon as the event worker `events` stops, since no result
    /// can be delivered after that. The registration is cancelled on every
    /// path that returns without content.
    pub async fn execute(
        &self,
        request: TaskRequest,
        events: &mut JoinHandle<CloseReason>,
        wait: Duration,
    ) -> Result<TaskContent, ClientError> {
        let (tx, rx) = oneshot::channel();
        let callback: TaskCallback = Box::new(move |content| {
            let _ = tx.send(content);
        });
        let handle = self.issue(request, callback).await?;
        tracing::info!(task_id = handle.task_id, "Waiting for result");

        tokio::select! {
            biased;
            result = tokio::time::timeout(wait, rx) => match result {
                Ok(Ok(content)) => Ok(content),
                Ok(Err(_)) => Err(ClientError::NoResult(handle.task_id)),
                Err(_) => {
                    self.cancel_callback(handle.task_id);
                    Err(ClientError::Timeout(wait))
                }
            },
            closed = events => {
                self.cancel_callback(handle.task_id);
                Err(ClientError::EventsStopped(closed.ok()))
            }
        }
    }

    /// Start the single event worker.
    pub fn spawn_event_handler(&self) -> JoinHandle<CloseReason> {
        let mut consumer = EventConsumer::new(
            Arc::clone(&self.rpc),
            Arc::clone(&self.registry),
            Arc::clone(&self.directory),
        )
        .with_fetch_timeout(self.fetch_timeout);
        tokio::spawn(async move { consumer.run().await })
    }
}
