use std::sync::Arc;

use async_trait::async_trait;
use fedplane_core::TaskManager;
use fedplane_model::{Task, TaskId};
use tracing::info;

use crate::{
    error::ApiError,
    handler::{ApiHandler, TaskList, TaskQuery},
};

/// [`ApiHandler`] delegating to a [`TaskManager`].
pub struct TaskManagerAdapter {
    manager: Arc<TaskManager>,
    /// Recorded as `updater` when the caller does not name one.
    default_updater: String,
}

impl TaskManagerAdapter {
    pub fn new(manager: Arc<TaskManager>, default_updater: impl Into<String>) -> Self {
        Self {
            manager,
            default_updater: default_updater.into(),
        }
    }

    fn updater<'a>(&'a self, updater: Option<&'a str>) -> &'a str {
        updater
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(&self.default_updater)
    }
}

#[async_trait]
impl ApiHandler for TaskManagerAdapter {
    async fn get_task(&self, id: &TaskId) -> Result<Task, ApiError> {
        Ok(self.manager.get_task_with_id(id).await?.masked())
    }

    async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskList, ApiError> {
        let page = self
            .manager
            .list_task(&query.condition(), &query.options())
            .await?;
        Ok(TaskList {
            items: page.items,
            total: page.total,
        })
    }

    async fn retry_task(
        &self,
        id: &TaskId,
        begin_step: &str,
        updater: Option<&str>,
    ) -> Result<(), ApiError> {
        let updater = self.updater(updater);
        self.manager.retry_task(id, begin_step, updater).await?;
        info!(task_id = %id, begin_step, updater, "retry requested");
        Ok(())
    }

    async fn terminate_task(&self, id: &TaskId, updater: Option<&str>) -> Result<(), ApiError> {
        let updater = self.updater(updater);
        self.manager.force_terminate(id, updater).await?;
        info!(task_id = %id, updater, "termination requested");
        Ok(())
    }
}
