use serde::{Deserialize, Serialize};

use crate::{Params, TaskStatus};

/// One ordered unit of a task's execution.
///
/// A step is owned by exactly one [`crate::Task`]; its position is defined by the task's `step_sequence`, never by the step itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    /// Human readable label.
    #[serde(default)]
    pub alias: String,
    /// Input parameters bound at build time.
    #[serde(default)]
    pub params: Params,
    /// Values produced by the step for later steps or operators.
    #[serde(default)]
    pub extras: Params,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub message: String,
    /// A failure here may be bypassed and execution continues with the next step.
    #[serde(default)]
    pub skip_on_failed: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    /// Seconds between `start` and `end`.
    #[serde(default)]
    pub execution_time: u64,
    /// `0` disables the per-step timeout.
    #[serde(default)]
    pub max_execution_seconds: u64,
    #[serde(default)]
    pub last_update: String,
}

impl Step {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            status: TaskStatus::NotStarted,
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_skip_on_failed(mut self, skip: bool) -> Self {
        self.skip_on_failed = skip;
        self
    }

    pub fn with_max_execution_seconds(mut self, secs: u64) -> Self {
        self.max_execution_seconds = secs;
        self
    }

    /// Forget the outcome of a previous attempt so the step can run again.
    ///
    /// `retry_count` is bumped only when the step had actually been attempted.
    pub fn reset_for_retry(&mut self, now: &str) {
        if self.status != TaskStatus::NotStarted {
            self.retry_count += 1;
        }
        self.status = TaskStatus::NotStarted;
        self.message.clear();
        self.start.clear();
        self.end.clear();
        self.execution_time = 0;
        self.last_update = now.to_string();
    }
}
