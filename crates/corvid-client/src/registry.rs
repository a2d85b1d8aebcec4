//! Pending task callbacks, keyed by task id.

use dashmap::DashMap;

use corvid_protocol::{TaskContent, TaskId};

/// Invoked at most once with the content of a cleanly finished task.
pub type TaskCallback = Box<dyn FnOnce(TaskContent) + Send + Sync>;

/// Concurrent map of task id to pending callback.
///
/// Operations on different ids never contend on a shared lock. For one id,
/// `resolve` and `cancel` race on the map entry: exactly one of them takes
/// the callback and the other observes absence.
#[derive(Default)]
pub struct TaskRegistry {
    pending: DashMap<TaskId, TaskCallback>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `callback` for `task_id`, replacing any earlier one.
    pub fn register(&self, task_id: TaskId, callback: TaskCallback) {
        if self.pending.insert(task_id, callback).is_some() {
            tracing::debug!(task_id, "Replaced pending callback");
        }
    }

    /// Drop the registration without invoking it. Returns whether one existed.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.pending.remove(&task_id).is_some()
    }

    /// Take the registration out. A second call returns `None`.
    pub fn resolve(&self, task_id: TaskId) -> Option<TaskCallback> {
        self.pending.remove(&task_id).map(|(_, callback)| callback)
    }

    /// Existence check; does not consume.
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.pending.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("pending", &self.pending.len())
            .finish()
    }
}
