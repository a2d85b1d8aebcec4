//! Server-pushed events multiplexed on one stream per client.
//!
//! The set of event kinds is closed. Each kind carries its own typed payload
//! so consumers match on variants instead of probing an untyped message.

use serde::{Deserialize, Serialize};

use crate::types::{ClientInfo, SessionRecord, TaskRef};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// An operator client subscribed to the event stream.
    #[serde(rename = "join")]
    Join { client: ClientInfo },
    /// An operator client went away.
    #[serde(rename = "leave")]
    Leave { client: ClientInfo },
    #[serde(rename = "broadcast")]
    Broadcast {
        source: String,
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<String>,
    },
    /// Session lifecycle change (registered, reconnected, dead, ...).
    #[serde(rename = "session-update")]
    SessionUpdate {
        session: SessionRecord,
        message: String,
    },
    #[serde(rename = "notify")]
    Notify {
        source: String,
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<String>,
    },
    /// Part of a task's output is ready; fetch and discard.
    #[serde(rename = "task-callback-ready")]
    TaskCallbackReady { task: TaskRef },
    /// A task reached its terminal state.
    #[serde(rename = "task-done")]
    TaskDone { task: TaskRef },
    #[serde(rename = "pipeline")]
    Pipeline {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<String>,
    },
    #[serde(rename = "website")]
    Website {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<String>,
    },
}

impl Event {
    /// Wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Join { .. } => "join",
            Event::Leave { .. } => "leave",
            Event::Broadcast { .. } => "broadcast",
            Event::SessionUpdate { .. } => "session-update",
            Event::Notify { .. } => "notify",
            Event::TaskCallbackReady { .. } => "task-callback-ready",
            Event::TaskDone { .. } => "task-done",
            Event::Pipeline { .. } => "pipeline",
            Event::Website { .. } => "website",
        }
    }

    /// Embedded task reference of task-scoped events.
    pub fn task(&self) -> Option<&TaskRef> {
        match self {
            Event::TaskCallbackReady { task } | Event::TaskDone { task } => Some(task),
            _ => None,
        }
    }

    pub fn task_done(task_id: crate::types::TaskId, session_id: impl Into<String>) -> Self {
        Event::TaskDone { task: TaskRef::new(task_id, session_id) }
    }

    pub fn task_callback_ready(
        task_id: crate::types::TaskId,
        session_id: impl Into<String>,
    ) -> Self {
        Event::TaskCallbackReady { task: TaskRef::new(task_id, session_id) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tag_matches_kind() {
        let events = vec![
            Event::Join { client: ClientInfo { name: "alice".into() } },
            Event::Broadcast {
                source: "bob".into(),
                data: "hi".into(),
                err: None,
            },
            Event::task_done(7, "S1"),
            Event::task_callback_ready(7, "S1"),
            Event::Website {
                message: "up".into(),
                err: Some("cert expired".into()),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn task_done_decodes_from_wire() {
        let line = r#"{"type":"task-done","task":{"task_id":12,"session_id":"S1"}}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.task(), Some(&TaskRef::new(12, "S1")));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let line = r#"{"type":"listener-started","message":"x"}"#;
        assert!(serde_json::from_str::<Event>(line).is_err());
    }

    #[test]
    fn informational_events_have_no_task() {
        let event = Event::Pipeline { message: "tcp up".into(), err: None };
        assert!(event.task().is_none());
    }
}
