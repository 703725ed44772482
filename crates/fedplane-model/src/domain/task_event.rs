use serde::{Deserialize, Serialize};

use crate::{TaskId, timestamp::now_rfc3339};

/// Kind of a task lifecycle event published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    TaskDispatched,
    TaskRetried,
    StepStarting,
    StepSucceeded,
    StepFailed,
    StepSkipped,
    StepTimeout,
    TaskSucceeded,
    TaskFailed,
    TaskTimeout,
    TaskForceTerminated,
    CallbackFailed,
}

/// A task lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub kind: EventKind,
    pub task_id: TaskId,
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: String,
}

impl TaskEvent {
    pub fn new(kind: EventKind, task_id: TaskId, task_type: impl Into<String>) -> Self {
        Self {
            kind,
            task_id,
            task_type: task_type.into(),
            step: None,
            reason: None,
            at: now_rfc3339(),
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
