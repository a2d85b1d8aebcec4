//! Server-side task bookkeeping.
//!
//! The board hands out task ids, remembers which agent a task belongs to and
//! holds the content once the agent reports back. Completion is announced on
//! the event broker; clients fetch the content afterwards.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use corvid_protocol::{
    Event, RpcStatus, TaskContent, TaskHandle, TaskId, TaskRef, TaskRequest, TaskSummary,
};
use corvid_state::Directory;

use crate::broker::EventBroker;

#[derive(Debug, Clone)]
struct TaskEntry {
    session_id: String,
    name: String,
    content: Option<TaskContent>,
}

#[derive(Debug)]
pub struct TaskBoard {
    next_id: AtomicU32,
    tasks: DashMap<TaskId, TaskEntry>,
    directory: Arc<Directory>,
    broker: EventBroker,
}

impl TaskBoard {
    pub fn new(directory: Arc<Directory>, broker: EventBroker) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            tasks: DashMap::new(),
            directory,
            broker,
        }
    }

    /// Schedule `request` on its session or beacon.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, RpcStatus> {
        if request.session_id.is_empty() {
            return Err(RpcStatus::invalid_argument("request has no session id"));
        }
        if !self.directory.contains_agent(&request.session_id).await {
            return Err(RpcStatus::not_found(format!(
                "no session or beacon {}",
                request.session_id
            )));
        }

        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(
            task_id,
            TaskEntry {
                session_id: request.session_id.clone(),
                name: request.name.clone(),
                content: None,
            },
        );
        let summary = TaskSummary { task_id, name: request.name.clone(), finished: false };
        if let Err(e) = self.directory.record_task(&request.session_id, summary).await {
            // Agent vanished between the check and the write.
            self.tasks.remove(&task_id);
            return Err(RpcStatus::not_found(e.to_string()));
        }

        tracing::info!(
            task_id,
            session_id = %request.session_id,
            name = %request.name,
            "Task submitted"
        );
        Ok(TaskHandle { task_id, session_id: request.session_id })
    }

    /// Announce that an intermediate callback for `task_id` is available.
    pub fn ready(&self, task_id: TaskId) -> Result<(), RpcStatus> {
        let session_id = self
            .tasks
            .get(&task_id)
            .map(|e| e.session_id.clone())
            .ok_or_else(|| RpcStatus::not_found(format!("unknown task {task_id}")))?;
        self.broker.publish(Event::task_callback_ready(task_id, session_id));
        Ok(())
    }

    /// Store the agent's result and publish `task-done`.
    pub async fn complete(&self, mut content: TaskContent) -> Result<(), RpcStatus> {
        let task_id = content.task_id;
        let task = content.task_ref();
        {
            let mut entry = self
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| RpcStatus::not_found(format!("unknown task {task_id}")))?;
            if entry.session_id != content.session_id {
                return Err(RpcStatus::invalid_argument(format!(
                    "task {task_id} does not belong to {}",
                    content.session_id
                )));
            }
            if content.name.is_empty() {
                content.name = entry.name.clone();
            }
            entry.content = Some(content);
        }

        if let Err(e) = self.directory.finish_task(&task.session_id, task_id).await {
            tracing::warn!(task_id, error = %e, "Task finished for unknown agent");
        }
        tracing::info!(task_id, session_id = %task.session_id, "Task complete");
        self.broker.publish(Event::TaskDone { task });
        Ok(())
    }

    /// Content of a finished task.
    pub fn content(&self, task: &TaskRef) -> Result<TaskContent, RpcStatus> {
        let entry = self
            .tasks
            .get(&task.task_id)
            .filter(|e| e.session_id == task.session_id)
            .ok_or_else(|| {
                RpcStatus::not_found(format!("no task {} on {}", task.task_id, task.session_id))
            })?;
        entry.content.clone().ok_or_else(|| {
            RpcStatus::failed_precondition(format!("task {} is still pending", task.task_id))
        })
    }

    /// Task history of one session or beacon.
    pub async fn tasks_for(&self, agent_id: &str) -> Result<Vec<TaskSummary>, RpcStatus> {
        if let Some(session) = self.directory.session(agent_id).await {
            return Ok(session.tasks);
        }
        if let Some(beacon) = self.directory.beacon(agent_id).await {
            return Ok(beacon.tasks);
        }
        Err(RpcStatus::not_found(format!("no session or beacon {agent_id}")))
    }

    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|e| e.content.is_none()).count()
    }
}
