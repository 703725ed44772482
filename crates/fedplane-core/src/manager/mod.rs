//! Task manager: the only path from callers and control loops to workflow execution.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use fedplane_model::{
    Condition, EventKind, ListOptions, Task, TaskEvent, TaskId, TaskPage, TaskStatus,
    timestamp::now_rfc3339,
};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::CoreError,
    metrics::{MetricsBackend, NoopMetrics, RetryMode},
    runtime::StepRuntime,
    store::TaskStore,
    subscriber::{EventBus, Subscribe},
};

/// Repairs external state a failed attempt may have left behind, before the task runs again.
#[async_trait]
pub trait RetryHook: Send + Sync + 'static {
    async fn before_retry(&self, task: &Task) -> Result<(), CoreError>;
}

pub struct TaskManager {
    store: Arc<TaskStore>,
    runtime: Arc<dyn StepRuntime>,
    hooks: HashMap<String, Arc<dyn RetryHook>>,
    events: EventBus,
    metrics: Arc<dyn MetricsBackend>,
}

pub struct TaskManagerBuilder {
    store: Arc<TaskStore>,
    runtime: Arc<dyn StepRuntime>,
    hooks: HashMap<String, Arc<dyn RetryHook>>,
    events: EventBus,
    metrics: Arc<dyn MetricsBackend>,
}

impl TaskManagerBuilder {
    /// Register the pre-retry hook of a workflow kind. A later registration replaces an earlier one.
    pub fn with_hook(mut self, task_type: impl Into<String>, hook: Arc<dyn RetryHook>) -> Self {
        self.hooks.insert(task_type.into(), hook);
        self
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.events.push(subscriber);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsBackend>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> TaskManager {
        TaskManager {
            store: self.store,
            runtime: self.runtime,
            hooks: self.hooks,
            events: self.events,
            metrics: self.metrics,
        }
    }
}

fn in_flight_statuses() -> [&'static str; 3] {
    [
        TaskStatus::Init.as_str(),
        TaskStatus::NotStarted.as_str(),
        TaskStatus::Running.as_str(),
    ]
}

impl TaskManager {
    pub fn builder(store: Arc<TaskStore>, runtime: Arc<dyn StepRuntime>) -> TaskManagerBuilder {
        TaskManagerBuilder {
            store,
            runtime,
            hooks: HashMap::new(),
            events: EventBus::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Persist `task` and hand it to the runtime.
    ///
    /// Dispatching a task id that is already stored returns that id without starting it again.
    #[instrument(level = "debug", skip(self, task), fields(task_id = %task.task_id, task_type = %task.task_type))]
    pub async fn dispatch(&self, task: Task) -> Result<TaskId, CoreError> {
        task.check_invariants().map_err(CoreError::Validation)?;

        match self.store.get_task(&task.task_id).await {
            Ok(existing) => {
                debug!(status = %existing.status, "task already dispatched");
                return Ok(existing.task_id);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.store.create_task(&task).await?;
        let task_id = task.task_id.clone();
        let task_type = task.task_type.clone();
        let task_index = task.task_index.clone();

        if let Err(e) = self.runtime.start(task).await {
            warn!(error = %e, "runtime refused task");
            self.mark_failed(&task_id, &e.to_string()).await;
            return Err(e);
        }

        info!(%task_index, "task dispatched");
        self.metrics.task_dispatched(&task_type);
        self.events
            .publish(TaskEvent::new(EventKind::TaskDispatched, task_id.clone(), task_type));
        Ok(task_id)
    }

    async fn mark_failed(&self, task_id: &TaskId, message: &str) {
        let mut fields = Map::new();
        fields.insert("status".into(), json!(TaskStatus::Failure));
        fields.insert("message".into(), json!(message));
        fields.insert("lastUpdate".into(), json!(now_rfc3339()));
        if let Err(e) = self.store.patch_task(task_id, fields).await {
            warn!(%task_id, error = %e, "failed to record dispatch failure");
        }
    }

    /// Dispatch unless a task of the same type is already in flight for `task.task_index`.
    pub async fn dispatch_unique(&self, task: Task) -> Result<TaskId, CoreError> {
        if let Some(existing) = self.find_in_flight(&task.task_index, &task.task_type).await? {
            return Err(CoreError::Conflict(format!(
                "{} task {} is already {} for {}",
                existing.task_type, existing.task_id, existing.status, existing.task_index
            )));
        }
        self.dispatch(task).await
    }

    /// A task of `task_type` for `task_index` that has not finished yet.
    pub async fn find_in_flight(
        &self,
        task_index: &str,
        task_type: &str,
    ) -> Result<Option<Task>, CoreError> {
        let cond = Condition::eq("taskIndex", task_index)
            .and(Condition::eq("taskType", task_type))
            .and(Condition::is_in("status", in_flight_statuses()));
        let page = self
            .store
            .list_task(&cond, &ListOptions::new().with_limit(1))
            .await?;
        Ok(page.items.into_iter().next())
    }

    pub async fn get_task_with_id(&self, task_id: &TaskId) -> Result<Task, CoreError> {
        self.store.get_task(task_id).await
    }

    pub async fn list_task(
        &self,
        cond: &Condition,
        opts: &ListOptions,
    ) -> Result<TaskPage<Task>, CoreError> {
        self.store.list_task(cond, opts).await
    }

    /// Re-run a failed task from its first step.
    pub async fn retry_all(&self, task: &Task, updater: &str) -> Result<(), CoreError> {
        let first = task
            .first_step()
            .ok_or_else(|| CoreError::Validation("task has no steps".into()))?
            .to_string();
        self.retry_from(task, &first, RetryMode::All, updater).await
    }

    /// Re-run a failed task starting at `step`.
    ///
    /// An unknown step is rejected before anything is read or written.
    pub async fn retry_at(&self, task: &Task, step: &str, updater: &str) -> Result<(), CoreError> {
        if !task.contains_step(step) {
            return Err(CoreError::Validation(format!(
                "step {step:?} is not part of task {}",
                task.task_id
            )));
        }
        self.retry_from(task, step, RetryMode::At, updater).await
    }

    /// Retry by id. An empty `begin_step` retries from the start.
    pub async fn retry_task(
        &self,
        task_id: &TaskId,
        begin_step: &str,
        updater: &str,
    ) -> Result<(), CoreError> {
        let task = self.store.get_task(task_id).await?;
        if begin_step.trim().is_empty() {
            self.retry_all(&task, updater).await
        } else {
            self.retry_at(&task, begin_step.trim(), updater).await
        }
    }

    #[instrument(level = "debug", skip(self, task), fields(task_id = %task.task_id, task_type = %task.task_type, step = %step))]
    async fn retry_from(
        &self,
        task: &Task,
        step: &str,
        mode: RetryMode,
        updater: &str,
    ) -> Result<(), CoreError> {
        let mut current = self.store.get_task(&task.task_id).await?;
        if !current.status.is_retryable() {
            return Err(CoreError::InvalidState {
                task_id: current.task_id.to_string(),
                status: current.status,
                expected: "Failure",
            });
        }
        let begin = current.step_index(step).ok_or_else(|| {
            CoreError::Validation(format!(
                "step {step:?} is not part of task {}",
                current.task_id
            ))
        })?;

        if let Some(hook) = self.hooks.get(&current.task_type) {
            hook.before_retry(&current).await?;
        }

        let now = now_rfc3339();
        for name in current.step_sequence[begin..].to_vec() {
            if let Some(s) = current.step_mut(&name) {
                s.reset_for_retry(&now);
            }
        }
        current.current_step = step.to_string();
        current.status = TaskStatus::Init;
        current.message.clear();
        current.end.clear();
        current.force_terminate = false;
        current.last_update = now;
        current.updater = updater.to_string();

        self.store.update_task(&current).await?;
        let task_id = current.task_id.clone();
        let task_type = current.task_type.clone();
        if let Err(e) = self.runtime.start(current).await {
            warn!(error = %e, "runtime refused retried task");
            self.mark_failed(&task_id, &e.to_string()).await;
            return Err(e);
        }

        info!(mode = mode.as_str(), "task retried");
        self.metrics.task_retried(&task_type, mode);
        self.events.publish(
            TaskEvent::new(EventKind::TaskRetried, task_id, task_type).with_step(step),
        );
        Ok(())
    }

    /// Stop a task that has not finished. The task ends in `ForceTerminate`.
    #[instrument(level = "debug", skip(self))]
    pub async fn force_terminate(&self, task_id: &TaskId, updater: &str) -> Result<(), CoreError> {
        let task = self.store.get_task(task_id).await?;
        if task.is_terminal() {
            return Err(CoreError::InvalidState {
                task_id: task_id.to_string(),
                status: task.status,
                expected: "a non-terminal status",
            });
        }

        let now = now_rfc3339();
        let mut fields = Map::new();
        fields.insert("forceTerminate".into(), Value::Bool(true));
        fields.insert("updater".into(), json!(updater));
        fields.insert("lastUpdate".into(), json!(now));
        self.store.patch_task(task_id, fields).await?;

        if self.runtime.terminate(task_id).await {
            debug!("runtime acknowledged termination");
            return Ok(());
        }

        // Not executing anywhere: finish the record here unless it finished meanwhile.
        let mut fields = Map::new();
        fields.insert("status".into(), json!(TaskStatus::ForceTerminate));
        fields.insert("end".into(), json!(now));
        fields.insert("message".into(), json!(format!("terminated by {updater}")));
        let guard = Condition::is_in("status", in_flight_statuses());
        if !self.store.patch_task_if(task_id, guard, fields).await? {
            debug!("task finished before termination was recorded");
            return Ok(());
        }
        self.events.publish(TaskEvent::new(
            EventKind::TaskForceTerminated,
            task_id.clone(),
            task.task_type,
        ));
        Ok(())
    }
}
