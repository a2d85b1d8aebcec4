//! Classification of task results into terminal failures.
//!
//! Two layers report failures for the same task:
//! - remote faults, raised by the agent runtime (`TaskContent::fault`)
//! - task statuses, raised by the server's task bookkeeping (`TaskContent::status`)
//!
//! A remote fault of kind "task error" carries the task status for detail.
//! That is the only nesting; a task status never embeds anything further.

use crate::types::{TaskContent, TaskStatus};

pub const FAULT_PANIC: u32 = 1;
pub const FAULT_UNPACK_ERROR: u32 = 2;
pub const FAULT_MISSING_BODY: u32 = 3;
pub const FAULT_MODULE_ERROR: u32 = 4;
pub const FAULT_MODULE_NOT_FOUND: u32 = 5;
pub const FAULT_TASK_ERROR: u32 = 6;
pub const FAULT_TASK_NOT_FOUND: u32 = 7;
pub const FAULT_TASK_OPERATOR_NOT_FOUND: u32 = 8;
pub const FAULT_EXTENSION_NOT_FOUND: u32 = 9;
pub const FAULT_UNEXPECTED_BODY: u32 = 10;

pub const STATUS_OPERATOR_ERROR: u32 = 1;
pub const STATUS_UNEXPECTED_BODY: u32 = 2;
pub const STATUS_FIELD_REQUIRED: u32 = 3;
pub const STATUS_FIELD_LENGTH_MISMATCH: u32 = 4;
pub const STATUS_FIELD_INVALID: u32 = 5;
pub const STATUS_TASK_ERROR: u32 = 6;

/// Fault raised inside the remote agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFault {
    Panic,
    UnpackError,
    MissingBody,
    ModuleError,
    ModuleNotFound,
    TaskError,
    TaskNotFound,
    TaskOperatorNotFound,
    ExtensionNotFound,
    UnexpectedBody,
    Unknown(u32),
}

impl RemoteFault {
    /// `None` for code 0 (no fault).
    pub fn from_code(code: u32) -> Option<Self> {
        let fault = match code {
            0 => return None,
            FAULT_PANIC => RemoteFault::Panic,
            FAULT_UNPACK_ERROR => RemoteFault::UnpackError,
            FAULT_MISSING_BODY => RemoteFault::MissingBody,
            FAULT_MODULE_ERROR => RemoteFault::ModuleError,
            FAULT_MODULE_NOT_FOUND => RemoteFault::ModuleNotFound,
            FAULT_TASK_ERROR => RemoteFault::TaskError,
            FAULT_TASK_NOT_FOUND => RemoteFault::TaskNotFound,
            FAULT_TASK_OPERATOR_NOT_FOUND => RemoteFault::TaskOperatorNotFound,
            FAULT_EXTENSION_NOT_FOUND => RemoteFault::ExtensionNotFound,
            FAULT_UNEXPECTED_BODY => RemoteFault::UnexpectedBody,
            other => RemoteFault::Unknown(other),
        };
        Some(fault)
    }

    pub fn category(&self) -> &'static str {
        match self {
            RemoteFault::Panic => "module panic",
            RemoteFault::UnpackError => "module unpack error",
            RemoteFault::MissingBody => "module missing body",
            RemoteFault::ModuleError => "module error",
            RemoteFault::ModuleNotFound => "module not found",
            RemoteFault::TaskError => "task error",
            RemoteFault::TaskNotFound => "task not found",
            RemoteFault::TaskOperatorNotFound => "task operator not found",
            RemoteFault::ExtensionNotFound => "extension not found",
            RemoteFault::UnexpectedBody => "unexpected body",
            RemoteFault::Unknown(_) => "unknown remote fault",
        }
    }
}

/// Kind of a non-zero task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatusKind {
    OperatorError,
    UnexpectedBody,
    FieldRequired,
    FieldLengthMismatch,
    FieldInvalid,
    TaskError,
    Unknown(u32),
}

impl TaskStatusKind {
    /// `None` for code 0 (clean).
    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            0 => return None,
            STATUS_OPERATOR_ERROR => TaskStatusKind::OperatorError,
            STATUS_UNEXPECTED_BODY => TaskStatusKind::UnexpectedBody,
            STATUS_FIELD_REQUIRED => TaskStatusKind::FieldRequired,
            STATUS_FIELD_LENGTH_MISMATCH => TaskStatusKind::FieldLengthMismatch,
            STATUS_FIELD_INVALID => TaskStatusKind::FieldInvalid,
            STATUS_TASK_ERROR => TaskStatusKind::TaskError,
            other => TaskStatusKind::Unknown(other),
        };
        Some(kind)
    }

    pub fn category(&self) -> &'static str {
        match self {
            TaskStatusKind::OperatorError => "operator error",
            TaskStatusKind::UnexpectedBody => "unexpected body",
            TaskStatusKind::FieldRequired => "required field missing",
            TaskStatusKind::FieldLengthMismatch => "field length mismatch",
            TaskStatusKind::FieldInvalid => "invalid field",
            TaskStatusKind::TaskError => "task error",
            TaskStatusKind::Unknown(_) => "unknown task status",
        }
    }
}

/// A non-zero task status with the server's error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusDetail {
    pub kind: TaskStatusKind,
    pub error: String,
}

impl TaskStatusDetail {
    pub fn from_status(status: &TaskStatus) -> Option<Self> {
        if status.is_ok() {
            return None;
        }
        TaskStatusKind::from_code(status.code).map(|kind| TaskStatusDetail {
            kind,
            error: status.error.clone(),
        })
    }
}

impl std::fmt::Display for TaskStatusDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TaskStatusKind::Unknown(code) => write!(f, "{} {code}", self.kind.category())?,
            kind => write!(f, "{}", kind.category())?,
        }
        if !self.error.is_empty() {
            write!(f, ": {}", self.error)?;
        }
        Ok(())
    }
}

/// Terminal failure of a task. Never delivered to the issuer's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    Remote {
        fault: RemoteFault,
        /// Only set for [`RemoteFault::TaskError`] with a non-zero status.
        status: Option<TaskStatusDetail>,
    },
    Status(TaskStatusDetail),
}

impl TaskFailure {
    /// Category of the outermost layer.
    pub fn category(&self) -> &'static str {
        match self {
            TaskFailure::Remote { fault, .. } => fault.category(),
            TaskFailure::Status(detail) => detail.kind.category(),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Remote { fault: RemoteFault::Unknown(code), .. } => {
                write!(f, "unknown remote fault {code}")
            }
            TaskFailure::Remote { fault, status: Some(detail) } => {
                write!(f, "{}: {detail}", fault.category())
            }
            TaskFailure::Remote { fault, status: None } => write!(f, "{}", fault.category()),
            TaskFailure::Status(detail) => write!(f, "task status {detail}"),
        }
    }
}

impl std::error::Error for TaskFailure {}

/// Classify fetched content. A non-zero remote fault takes precedence over
/// the task status.
pub fn classify(content: &TaskContent) -> Result<(), TaskFailure> {
    if let Some(fault) = RemoteFault::from_code(content.fault) {
        let status = match fault {
            RemoteFault::TaskError => TaskStatusDetail::from_status(&content.status),
            _ => None,
        };
        return Err(TaskFailure::Remote { fault, status });
    }
    if let Some(detail) = TaskStatusDetail::from_status(&content.status) {
        return Err(TaskFailure::Status(detail));
    }
    Ok(())
}
