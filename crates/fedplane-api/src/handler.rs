use async_trait::async_trait;
use fedplane_model::{Condition, ListOptions, SortOrder, Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Filter and page of a task listing. Absent fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub task_index: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl TaskQuery {
    pub fn condition(&self) -> Condition {
        let mut cond = Condition::all();
        if let Some(t) = &self.task_type {
            cond = cond.and(Condition::eq("taskType", t.as_str()));
        }
        if let Some(i) = &self.task_index {
            cond = cond.and(Condition::eq("taskIndex", i.as_str()));
        }
        if let Some(s) = self.status {
            cond = cond.and(Condition::eq("status", s.as_str()));
        }
        cond
    }

    /// Newest first; sensitive parameters masked.
    pub fn options(&self) -> ListOptions {
        ListOptions::new()
            .sort_by("start", SortOrder::Desc)
            .with_limit(self.limit.unwrap_or_default())
            .with_offset(self.offset.unwrap_or_default())
            .with_skip_decrypt()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub items: Vec<Task>,
    pub total: usize,
}

/// Task read and operator API.
///
/// Implement it directly to add auth or auditing around [`crate::TaskManagerAdapter`].
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    /// Task by id, sensitive parameters masked.
    async fn get_task(&self, id: &TaskId) -> Result<Task, ApiError>;

    async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskList, ApiError>;

    /// Retry a failed task; an empty `begin_step` retries from the first step.
    async fn retry_task(
        &self,
        id: &TaskId,
        begin_step: &str,
        updater: Option<&str>,
    ) -> Result<(), ApiError>;

    async fn terminate_task(&self, id: &TaskId, updater: Option<&str>) -> Result<(), ApiError>;
}
