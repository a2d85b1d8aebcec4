use serde::{Deserialize, Serialize};

/// Server-assigned task identifier.
pub type TaskId = u32;

/// Reference to a task embedded in task-scoped events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: TaskId,
    pub session_id: String,
}

impl TaskRef {
    pub fn new(task_id: TaskId, session_id: impl Into<String>) -> Self {
        Self { task_id, session_id: session_id.into() }
    }
}

/// Synchronous answer to a submitted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub session_id: String,
}

impl From<TaskHandle> for TaskRef {
    fn from(handle: TaskHandle) -> Self {
        TaskRef { task_id: handle.task_id, session_id: handle.session_id }
    }
}

/// A command addressed to a session or beacon. The payload is opaque to the
/// control plane; only `session_id` is interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub input: String,
}

impl TaskRequest {
    pub fn new(session_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }
}

/// Task bookkeeping status reported by the server. Code 0 is clean.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub code: u32,
    #[serde(default)]
    pub error: String,
}

impl TaskStatus {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Full result of a task as fetched after a task-scoped event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContent {
    pub task_id: TaskId,
    pub session_id: String,
    #[serde(default)]
    pub name: String,
    /// Remote fault code raised inside the agent runtime; 0 when none.
    #[serde(default)]
    pub fault: u32,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl TaskContent {
    /// Clean content carrying `body`.
    pub fn ok(task: &TaskRef, body: serde_json::Value) -> Self {
        Self {
            task_id: task.task_id,
            session_id: task.session_id.clone(),
            body,
            ..Default::default()
        }
    }

    pub fn with_fault(mut self, fault: u32) -> Self {
        self.fault = fault;
        self
    }

    pub fn with_status(mut self, code: u32, error: impl Into<String>) -> Self {
        self.status = TaskStatus { code, error: error.into() };
        self
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef::new(self.task_id, self.session_id.clone())
    }
}

/// One entry of an agent's accumulated task history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub name: String,
    pub finished: bool,
}

/// A continuously connected remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub remote_addr: String,
    pub alive: bool,
    pub last_checkin: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub tasks: Vec<TaskSummary>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            name: name.into(),
            remote_addr: String::new(),
            alive: true,
            last_checkin: chrono::Utc::now(),
            tasks: Vec::new(),
        }
    }
}

/// A remote agent that checks in periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconRecord {
    pub beacon_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub remote_addr: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub jitter: u64,
    pub alive: bool,
    pub last_checkin: chrono::DateTime<chrono::Utc>,
    pub next_checkin: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub tasks: Vec<TaskSummary>,
}

impl BeaconRecord {
    pub fn new(beacon_id: impl Into<String>, name: impl Into<String>, interval_secs: u64) -> Self {
        let now = chrono::Utc::now();
        Self {
            beacon_id: beacon_id.into(),
            name: name.into(),
            remote_addr: String::new(),
            interval_secs,
            jitter: 0,
            alive: true,
            last_checkin: now,
            next_checkin: now + chrono::Duration::seconds(interval_secs as i64),
            tasks: Vec::new(),
        }
    }
}

/// Durable operator record. Only the digest of the bearer token is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    pub token_digest: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// An operator client as announced in join/leave events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_keeps_payload() {
        let request = TaskRequest::new("S1", "execute")
            .with_args(vec!["-l".into()])
            .with_input("payload");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["session_id"], "S1");
        assert_eq!(json["args"], serde_json::json!(["-l"]));
        assert_eq!(json["input"], "payload");
    }

    #[test]
    fn content_knows_its_task() {
        let task = TaskRef::new(3, "B1");
        let content = TaskContent::ok(&task, serde_json::Value::Null).with_status(0, "");
        assert_eq!(content.task_ref(), task);
        assert!(content.status.is_ok());
        assert!(!content.with_status(2, "bad").status.is_ok());
    }
}
