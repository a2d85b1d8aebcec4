//! Consumer of the server event stream.
//!
//! One worker reads the stream and handles events strictly in arrival order.
//! Task-scoped events resolve pending registrations in the [`TaskRegistry`];
//! everything else is rendered to the log.

use std::sync::Arc;
use std::time::Duration;

use corvid_protocol::{classify, Event, TaskContent, TaskFailure, TaskId, TaskRef};
use corvid_state::Directory;

use crate::registry::TaskRegistry;
use crate::rpc::ControlPlane;
use crate::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Streaming,
    Closed(CloseReason),
}

/// Why the consumer stopped. Every reason is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    EndOfStream,
    SubscribeFailed,
    StreamError,
}

/// What handling one event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Informational event written to the log.
    Rendered,
    /// Pipeline or website event carrying an error.
    Rejected,
    /// Callback invoked with clean content.
    Delivered(TaskId),
    /// Content classified as a failure; registration consumed.
    Failed { task_id: TaskId, failure: TaskFailure },
    /// Fetch returned an error; registration consumed.
    FetchFailed(TaskId),
    /// Fetch exceeded the timeout; registration consumed.
    TimedOut(TaskId),
    /// No registration for this task.
    Unclaimed(TaskId),
    /// Registration cancelled while its content was being fetched.
    Cancelled(TaskId),
    /// Callback-ready signal handled and registration dropped.
    Discarded(TaskId),
}

pub struct EventConsumer {
    rpc: Arc<dyn ControlPlane>,
    registry: Arc<TaskRegistry>,
    directory: Arc<Directory>,
    fetch_timeout: Duration,
    state: ConsumerState,
}

impl EventConsumer {
    pub fn new(
        rpc: Arc<dyn ControlPlane>,
        registry: Arc<TaskRegistry>,
        directory: Arc<Directory>,
    ) -> Self {
        Self {
            rpc,
            registry,
            directory,
            fetch_timeout: Duration::from_secs(corvid_protocol::TASK_FETCH_TIMEOUT_SECS),
            state: ConsumerState::Connecting,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Subscribe and handle events until the stream ends or fails. There is
    /// no reconnect; the returned reason is final.
    pub async fn run(&mut self) -> CloseReason {
        self.state = ConsumerState::Connecting;
        let mut stream = match self.rpc.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to subscribe to server events");
                return self.close(CloseReason::SubscribeFailed);
            }
        };
        self.state = ConsumerState::Streaming;

        loop {
            match stream.next_event().await {
                Ok(Some(event)) => {
                    let kind = event.kind();
                    let outcome = self.dispatch(event).await;
                    tracing::trace!(kind, ?outcome, "Event handled");
                }
                Ok(None) => return self.close(CloseReason::EndOfStream),
                Err(e) => {
                    tracing::error!(error = %e, "Event stream failed");
                    return self.close(CloseReason::StreamError);
                }
            }
        }
    }

    fn close(&mut self, reason: CloseReason) -> CloseReason {
        tracing::info!(?reason, "Event stream closed");
        self.state = ConsumerState::Closed(reason);
        reason
    }

    /// Handle one event.
    pub async fn dispatch(&self, event: Event) -> Dispatch {
        match event {
            Event::Join { client } => {
                tracing::info!(operator = %client.name, "Operator joined");
                Dispatch::Rendered
            }
            Event::Leave { client } => {
                tracing::info!(operator = %client.name, "Operator left");
                Dispatch::Rendered
            }
            Event::Broadcast { source, data, err } | Event::Notify { source, data, err } => {
                match err.filter(|e| !e.is_empty()) {
                    Some(err) => tracing::warn!(source = %source, error = %err, "{data}"),
                    None => tracing::info!(source = %source, "{data}"),
                }
                Dispatch::Rendered
            }
            Event::SessionUpdate { session, message } => {
                tracing::info!(
                    session_id = %session.session_id,
                    name = %session.name,
                    "Session {message}"
                );
                self.directory.upsert_session(session).await;
                Dispatch::Rendered
            }
            Event::Pipeline { message, err } => Self::render_checked("pipeline", &message, err),
            Event::Website { message, err } => Self::render_checked("website", &message, err),
            Event::TaskCallbackReady { task } => self.callback_ready(task).await,
            Event::TaskDone { task } => self.task_done(task).await,
        }
    }

    fn render_checked(kind: &str, message: &str, err: Option<String>) -> Dispatch {
        if let Some(err) = err.filter(|e| !e.is_empty()) {
            tracing::error!(kind, error = %err, "{message}");
            return Dispatch::Rejected;
        }
        tracing::info!(kind, "{message}");
        Dispatch::Rendered
    }

    async fn fetch(&self, task: &TaskRef) -> Result<TaskContent, ClientError> {
        match tokio::time::timeout(self.fetch_timeout, self.rpc.task_content(task)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.fetch_timeout)),
        }
    }

    async fn callback_ready(&self, task: TaskRef) -> Dispatch {
        if !self.registry.contains(task.task_id) {
            tracing::debug!(task_id = task.task_id, "No registration for callback-ready task");
            return Dispatch::Unclaimed(task.task_id);
        }
        if let Err(e) = self.fetch(&task).await {
            tracing::warn!(
                task_id = task.task_id,
                error = %e,
                "Failed to fetch ready task content"
            );
        }
        drop(self.registry.resolve(task.task_id));
        Dispatch::Discarded(task.task_id)
    }

    async fn task_done(&self, task: TaskRef) -> Dispatch {
        let task_id = task.task_id;
        if !self.registry.contains(task_id) {
            tracing::debug!(
                task_id,
                session_id = %task.session_id,
                "No registration for finished task"
            );
            return Dispatch::Unclaimed(task_id);
        }

        let content = match self.fetch(&task).await {
            Ok(content) => content,
            Err(e) => {
                drop(self.registry.resolve(task_id));
                tracing::error!(task_id, error = %e, "Failed to fetch task content");
                return match e {
                    ClientError::Timeout(_) => Dispatch::TimedOut(task_id),
                    _ => Dispatch::FetchFailed(task_id),
                };
            }
        };

        if let Err(failure) = classify(&content) {
            drop(self.registry.resolve(task_id));
            tracing::error!(
                task_id,
                session_id = %task.session_id,
                category = failure.category(),
                "Task failed: {failure}"
            );
            return Dispatch::Failed { task_id, failure };
        }

        match self.registry.resolve(task_id) {
            Some(callback) => {
                callback(content);
                Dispatch::Delivered(task_id)
            }
            None => {
                tracing::debug!(task_id, "Registration cancelled during fetch");
                Dispatch::Cancelled(task_id)
            }
        }
    }
}
