use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use fedplane_core::{
    Admission, CoreError, EventBus, MetricsBackend, NoopMetrics, StepRuntime, SupervisorApi,
    TaskStore, supervisor::slot_name,
};
use fedplane_model::{
    EventKind, Task, TaskEvent, TaskId, TaskStatus,
    timestamp::{elapsed_seconds, now_rfc3339},
};
use serde_json::{Map, Value, json};
use taskvisor::{TaskError, TaskFn, TaskRef};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::RuntimeConfig,
    error::{ExecError, ExecResult},
    registry::{CallbackRegistry, HandlerRegistry, StepContext, StepHandler},
};

/// In-process step runtime.
///
/// Each started task is submitted to the taskvisor supervisor as a one-shot run that walks `step_sequence`
/// from `current_step` and persists every transition with a field patch. Runs for the same
/// `taskType`/`taskIndex` share a supervisor slot and queue behind each other.
#[derive(Clone)]
pub struct LocalRuntime {
    inner: Arc<Inner>,
}

struct Inner {
    supervisor: SupervisorApi,
    store: Arc<TaskStore>,
    handlers: HandlerRegistry,
    callbacks: CallbackRegistry,
    events: EventBus,
    metrics: Arc<dyn MetricsBackend>,
    config: RuntimeConfig,
    /// Submitted and not yet finished; the token is how `terminate` reaches the run.
    running: Mutex<HashMap<TaskId, CancellationToken>>,
}

pub struct LocalRuntimeBuilder {
    supervisor: SupervisorApi,
    store: Arc<TaskStore>,
    handlers: HandlerRegistry,
    callbacks: CallbackRegistry,
    events: EventBus,
    metrics: Arc<dyn MetricsBackend>,
    config: RuntimeConfig,
}

impl LocalRuntimeBuilder {
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
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

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> LocalRuntime {
        LocalRuntime {
            inner: Arc::new(Inner {
                supervisor: self.supervisor,
                store: self.store,
                handlers: self.handlers,
                callbacks: self.callbacks,
                events: self.events,
                metrics: self.metrics,
                config: self.config,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl LocalRuntime {
    pub fn builder(store: Arc<TaskStore>, supervisor: SupervisorApi) -> LocalRuntimeBuilder {
        LocalRuntimeBuilder {
            supervisor,
            store,
            handlers: HandlerRegistry::new(),
            callbacks: CallbackRegistry::new(),
            events: EventBus::default(),
            metrics: Arc::new(NoopMetrics),
            config: RuntimeConfig::default(),
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.handlers
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.inner.callbacks
    }

    /// Number of tasks submitted and not yet finished.
    pub fn running(&self) -> usize {
        self.inner.running.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Supervisor slot shared by runs of the same workflow on the same resource.
    fn slot(task: &Task) -> &'static str {
        let key = if task.task_index.is_empty() {
            task.task_id.as_str()
        } else {
            task.task_index.as_str()
        };
        slot_name(&format!("task/{}/{key}", task.task_type))
    }

    fn supervised(&self, task: Task, cancel: CancellationToken) -> TaskRef {
        let inner = Arc::clone(&self.inner);
        TaskFn::arc(Self::slot(&task), move |ctx: CancellationToken| {
            let inner = Arc::clone(&inner);
            let task = task.clone();
            let cancel = cancel.clone();
            async move {
                if ctx.is_cancelled() {
                    inner.forget(&task.task_id);
                    return Err(TaskError::Canceled);
                }
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => {
                        // Supervisor shutdown: the document keeps its last persisted status.
                        warn!(task_id = %task.task_id, "run abandoned by supervisor shutdown");
                        inner.forget(&task.task_id);
                        Err(TaskError::Canceled)
                    }
                    _ = inner.execute(task.clone(), cancel) => Ok(()),
                }
            }
        })
    }
}

#[async_trait]
impl StepRuntime for LocalRuntime {
    async fn start(&self, task: Task) -> Result<(), CoreError> {
        let cancel = CancellationToken::new();
        {
            let mut running = self
                .inner
                .running
                .lock()
                .map_err(|_| CoreError::Runtime("running table poisoned".into()))?;
            if running.contains_key(&task.task_id) {
                return Err(CoreError::Conflict(format!(
                    "task {} is already executing",
                    task.task_id
                )));
            }
            running.insert(task.task_id.clone(), cancel.clone());
        }

        let task_id = task.task_id.clone();
        let run = self.supervised(task, cancel);
        if let Err(e) = self.inner.supervisor.submit(run, Admission::Queue).await {
            self.inner.forget(&task_id);
            return Err(e);
        }
        Ok(())
    }

    async fn terminate(&self, task_id: &TaskId) -> bool {
        let token = self
            .inner
            .running
            .lock()
            .ok()
            .and_then(|r| r.get(task_id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Field-level patch of a task document.
#[derive(Default)]
struct Patch(Map<String, Value>);

impl Patch {
    fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    fn step(self, step: &str, field: &str, value: Value) -> Self {
        self.set(format!("steps.{step}.{field}"), value)
    }
}

enum StepOutcome {
    Succeeded,
    Skipped,
    Halted(TaskStatus, String),
}

impl Inner {
    fn forget(&self, task_id: &TaskId) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(task_id);
        }
    }

    async fn persist(&self, task_id: &TaskId, patch: Patch) -> Result<(), CoreError> {
        self.store.patch_task(task_id, patch.0).await
    }

    fn publish(&self, task: &Task, kind: EventKind, step: Option<&str>, reason: Option<&str>) {
        let mut event = TaskEvent::new(kind, task.task_id.clone(), task.task_type.clone());
        if let Some(step) = step {
            event = event.with_step(step);
        }
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        self.events.publish(event);
    }

    #[instrument(level = "debug", skip_all, fields(task_id = %task.task_id, task_type = %task.task_type))]
    async fn execute(&self, mut task: Task, cancel: CancellationToken) {
        let deadline = self
            .config
            .task_timeout(task.max_execution_seconds)
            .map(|limit| Instant::now() + limit);
        let begin = task.step_index(&task.current_step).unwrap_or(0);

        let mut status = TaskStatus::Success;
        let mut message = String::new();
        for name in task.step_sequence[begin..].to_vec() {
            if cancel.is_cancelled() {
                status = TaskStatus::ForceTerminate;
                message = "force terminated".into();
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                status = TaskStatus::Timeout;
                message = format!("task timed out before step {name}");
                break;
            }
            match self.run_step(&mut task, &name, &cancel, deadline).await {
                StepOutcome::Succeeded | StepOutcome::Skipped => {}
                StepOutcome::Halted(s, m) => {
                    status = s;
                    message = m;
                    break;
                }
            }
        }

        // Stay terminable until the outcome is persisted, then drop out before the callback runs.
        let task = self.finish(task, status, message).await;
        self.forget(&task.task_id);
        self.run_callback(&task).await;
    }

    async fn run_step(
        &self,
        task: &mut Task,
        name: &str,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> StepOutcome {
        let Some(step) = task.step(name).cloned() else {
            return StepOutcome::Halted(TaskStatus::Failure, format!("step {name} is not defined"));
        };

        let start = now_rfc3339();
        let patch = Patch::default()
            .set("status", json!(TaskStatus::Running))
            .set("currentStep", json!(name))
            .set("lastUpdate", json!(start))
            .step(name, "status", json!(TaskStatus::Running))
            .step(name, "start", json!(start))
            .step(name, "lastUpdate", json!(start));
        if let Err(e) = self.persist(&task.task_id, patch).await {
            error!(step = name, error = %e, "failed to persist step start");
            return StepOutcome::Halted(TaskStatus::Failure, e.to_string());
        }
        task.status = TaskStatus::Running;
        task.current_step = name.to_string();
        if let Some(s) = task.step_mut(name) {
            s.status = TaskStatus::Running;
            s.start = start.clone();
        }
        self.publish(task, EventKind::StepStarting, Some(name), None);

        let limit = match (
            self.config.step_timeout(step.max_execution_seconds),
            deadline.map(|d| d.saturating_duration_since(Instant::now())),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let ctx = StepContext {
            task: task.clone(),
            step: step.clone(),
            cancel: cancel.clone(),
        };
        let result = match self.handlers.get(name) {
            Some(handler) => guarded(handler.as_ref(), &ctx, limit, cancel).await,
            None => Err(ExecError::UnknownStep(name.to_string())),
        };

        let end = now_rfc3339();
        let secs = elapsed_seconds(&start, &end);
        let (step_status, step_message, outcome, extras) = match result {
            Ok(extras) => (TaskStatus::Success, String::new(), StepOutcome::Succeeded, extras),
            Err(ExecError::Timeout { secs }) => {
                let message = format!("step {name} timed out after {secs}s");
                (
                    TaskStatus::Timeout,
                    message.clone(),
                    StepOutcome::Halted(TaskStatus::Timeout, message),
                    Default::default(),
                )
            }
            Err(ExecError::Cancelled) => (
                TaskStatus::ForceTerminate,
                "force terminated".to_string(),
                StepOutcome::Halted(TaskStatus::ForceTerminate, "force terminated".into()),
                Default::default(),
            ),
            Err(e) => {
                let message = e.to_string();
                self.publish(task, EventKind::StepFailed, Some(name), Some(&message));
                let outcome = if step.skip_on_failed {
                    warn!(step = name, error = %message, "step failed; skipping");
                    StepOutcome::Skipped
                } else {
                    StepOutcome::Halted(
                        TaskStatus::Failure,
                        format!("step {name} failed: {message}"),
                    )
                };
                (TaskStatus::Failure, message, outcome, Default::default())
            }
        };

        let mut merged = step.extras.clone();
        merged.extend(extras);

        let patch = Patch::default()
            .set("lastUpdate", json!(end))
            .step(name, "status", json!(step_status))
            .step(name, "end", json!(end))
            .step(name, "executionTime", json!(secs))
            .step(name, "lastUpdate", json!(end))
            .step(name, "message", json!(step_message))
            .step(name, "extras", json!(merged));
        if let Err(e) = self.persist(&task.task_id, patch).await {
            error!(step = name, error = %e, "failed to persist step outcome");
        }
        if let Some(s) = task.step_mut(name) {
            s.status = step_status;
            s.end = end;
            s.execution_time = secs;
            s.message = step_message;
            s.extras = merged;
        }

        self.metrics
            .step_finished(&task.task_type, name, step_status, secs);
        match (&outcome, step_status) {
            (StepOutcome::Succeeded, _) => {
                debug!(step = name, secs, "step succeeded");
                self.publish(task, EventKind::StepSucceeded, Some(name), None);
            }
            (StepOutcome::Skipped, _) => {
                self.publish(task, EventKind::StepSkipped, Some(name), None);
            }
            (StepOutcome::Halted(_, reason), TaskStatus::Timeout) => {
                self.publish(task, EventKind::StepTimeout, Some(name), Some(reason));
            }
            (StepOutcome::Halted(..), _) => {}
        }
        outcome
    }

    async fn finish(&self, mut task: Task, status: TaskStatus, message: String) -> Task {
        let end = now_rfc3339();
        let secs = elapsed_seconds(&task.start, &end);

        let mut patch = Patch::default()
            .set("status", json!(status))
            .set("end", json!(end))
            .set("executionTime", json!(secs))
            .set("message", json!(message))
            .set("lastUpdate", json!(end));
        if status == TaskStatus::ForceTerminate {
            patch = patch.set("forceTerminate", Value::Bool(true));
        }
        if let Err(e) = self.persist(&task.task_id, patch).await {
            error!(task_id = %task.task_id, error = %e, "failed to persist task outcome");
        }
        task.status = status;
        task.end = end;
        task.execution_time = secs;
        task.message = message.clone();
        task.last_update = task.end.clone();

        self.metrics.task_finished(&task.task_type, status, secs);
        let kind = match status {
            TaskStatus::Success => {
                info!(task_id = %task.task_id, secs, "task succeeded");
                EventKind::TaskSucceeded
            }
            TaskStatus::Timeout => {
                warn!(task_id = %task.task_id, %message, "task timed out");
                EventKind::TaskTimeout
            }
            TaskStatus::ForceTerminate => {
                warn!(task_id = %task.task_id, "task force terminated");
                EventKind::TaskForceTerminated
            }
            _ => {
                warn!(task_id = %task.task_id, %message, "task failed");
                EventKind::TaskFailed
            }
        };
        let reason = (!message.is_empty()).then_some(message.as_str());
        self.publish(&task, kind, None, reason);
        task
    }

    async fn run_callback(&self, task: &Task) {
        let name = task.call_back_func_name.as_str();
        if name.is_empty() {
            return;
        }
        let result = match self.callbacks.get(name) {
            Some(cb) => cb.call(task).await,
            None => Err(ExecError::Failed(format!("callback {name} is not registered"))),
        };
        if let Err(e) = result {
            warn!(task_id = %task.task_id, callback = name, error = %e, "callback failed");
            self.publish(task, EventKind::CallbackFailed, None, Some(&e.to_string()));
        }
    }
}

/// Run `handler` until it returns, `limit` elapses or `cancel` fires.
async fn guarded(
    handler: &dyn StepHandler,
    ctx: &StepContext,
    limit: Option<Duration>,
    cancel: &CancellationToken,
) -> ExecResult<fedplane_model::Params> {
    let run = async {
        match limit {
            Some(limit) => tokio::time::timeout(limit, handler.run(ctx))
                .await
                .unwrap_or(Err(ExecError::Timeout {
                    secs: limit.as_secs(),
                })),
            None => handler.run(ctx).await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        res = run => res,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fedplane_core::{TaskManager, memory::MemoryDocumentStore};
    use fedplane_model::{Params, Step};

    use super::*;
    use crate::registry::TaskCallback;

    struct Succeed;

    #[async_trait]
    impl StepHandler for Succeed {
        async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
            Ok(Params::from([("ran".to_string(), ctx.step.name.clone())]))
        }
    }

    struct Fail;

    #[async_trait]
    impl StepHandler for Fail {
        async fn run(&self, _: &StepContext) -> ExecResult<Params> {
            Err(ExecError::Failed("boom".into()))
        }
    }

    struct Sleep(Duration);

    #[async_trait]
    impl StepHandler for Sleep {
        async fn run(&self, _: &StepContext) -> ExecResult<Params> {
            tokio::time::sleep(self.0).await;
            Ok(Params::new())
        }
    }

    #[derive(Default)]
    struct Count(AtomicUsize);

    /// Callback that holds until released.
    #[derive(Default)]
    struct Gate {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl TaskCallback for Gate {
        async fn call(&self, _: &Task) -> ExecResult<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[async_trait]
    impl TaskCallback for Count {
        async fn call(&self, _: &Task) -> ExecResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn task(steps: &[&str]) -> Task {
        let mut t = Task::new("test", "test");
        for s in steps {
            t.push_step(Step::new(*s, *s));
        }
        t
    }

    async fn setup() -> (Arc<TaskStore>, LocalRuntime) {
        let store = Arc::new(TaskStore::new(Arc::new(MemoryDocumentStore::new())));
        let supervisor = SupervisorApi::new_default(Vec::new()).await;
        let rt = LocalRuntime::builder(Arc::clone(&store), supervisor).build();
        rt.handlers()
            .register("ok", Arc::new(Succeed))
            .register("ok2", Arc::new(Succeed))
            .register("fail", Arc::new(Fail))
            .register("slow", Arc::new(Sleep(Duration::from_secs(3600))));
        (store, rt)
    }

    async fn wait_terminal(store: &TaskStore, id: &TaskId) -> Task {
        for _ in 0..1000 {
            let t = store.get_task(id).await.unwrap();
            if t.is_terminal() {
                return t;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} never finished");
    }

    #[tokio::test]
    async fn runs_all_steps_in_order_and_calls_back() {
        let (store, rt) = setup().await;
        let cb = Arc::new(Count::default());
        rt.callbacks().register("done", cb.clone());

        let mut t = task(&["ok", "ok2"]);
        t.call_back_func_name = "done".into();
        store.create_task(&t).await.unwrap();
        rt.start(t.clone()).await.unwrap();

        let back = wait_terminal(&store, &t.task_id).await;
        assert_eq!(back.status, TaskStatus::Success);
        assert_eq!(back.current_step, "ok2");
        assert_eq!(back.step("ok").unwrap().status, TaskStatus::Success);
        assert_eq!(back.step("ok2").unwrap().extras["ran"], "ok2");
        assert!(!back.end.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.0.load(Ordering::SeqCst), 1);
        assert_eq!(rt.running(), 0);
    }

    #[tokio::test]
    async fn failure_halts_unless_skippable() {
        let (store, rt) = setup().await;
        let t = task(&["ok", "fail", "ok2"]);
        store.create_task(&t).await.unwrap();
        rt.start(t.clone()).await.unwrap();

        let back = wait_terminal(&store, &t.task_id).await;
        assert_eq!(back.status, TaskStatus::Failure);
        assert_eq!(back.current_step, "fail");
        assert_eq!(back.step("fail").unwrap().message, "step failed: boom");
        assert_eq!(back.message, "step fail failed: step failed: boom");
        assert_eq!(back.step("ok2").unwrap().status, TaskStatus::NotStarted);

        let mut t = Task::new("test", "test");
        t.push_step(Step::new("fail", "fail").with_skip_on_failed(true));
        t.push_step(Step::new("ok", "ok"));
        store.create_task(&t).await.unwrap();
        rt.start(t.clone()).await.unwrap();

        let back = wait_terminal(&store, &t.task_id).await;
        assert_eq!(back.status, TaskStatus::Success);
        assert_eq!(back.step("fail").unwrap().status, TaskStatus::Failure);
    }

    #[tokio::test]
    async fn missing_handler_fails_task() {
        let (store, rt) = setup().await;
        let t = task(&["nobody"]);
        store.create_task(&t).await.unwrap();
        rt.start(t.clone()).await.unwrap();

        let back = wait_terminal(&store, &t.task_id).await;
        assert_eq!(back.status, TaskStatus::Failure);
        assert!(back.message.contains("no handler registered"));
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_marks_task_timeout() {
        let (store, rt) = setup().await;
        let mut t = Task::new("test", "test");
        t.push_step(Step::new("slow", "slow").with_max_execution_seconds(2));
        store.create_task(&t).await.unwrap();
        rt.start(t.clone()).await.unwrap();

        let back = wait_terminal(&store, &t.task_id).await;
        assert_eq!(back.status, TaskStatus::Timeout);
        assert_eq!(back.step("slow").unwrap().status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn force_terminate_through_manager_cancels_running_step() {
        let (store, rt) = setup().await;
        let manager = TaskManager::builder(Arc::clone(&store), Arc::new(rt.clone())).build();
        let t = task(&["slow", "ok"]);
        let id = manager.dispatch(t).await.unwrap();

        for _ in 0..100 {
            if store.get_task(&id).await.unwrap().status == TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        manager.force_terminate(&id, "op").await.unwrap();

        let back = wait_terminal(&store, &id).await;
        assert_eq!(back.status, TaskStatus::ForceTerminate);
        assert!(back.force_terminate);
        assert_eq!(back.step("ok").unwrap().status, TaskStatus::NotStarted);
    }

    #[tokio::test]
    async fn retry_resumes_from_failed_step() {
        let (store, rt) = setup().await;
        let manager = TaskManager::builder(Arc::clone(&store), Arc::new(rt.clone())).build();
        let id = manager.dispatch(task(&["ok", "fail", "ok2"])).await.unwrap();
        let failed = wait_terminal(&store, &id).await;
        assert_eq!(failed.status, TaskStatus::Failure);

        // Fix the step, then retry from it.
        rt.handlers().register("fail", Arc::new(Succeed));
        manager.retry_at(&failed, "fail", "op").await.unwrap();

        let back = wait_terminal(&store, &id).await;
        assert_eq!(back.status, TaskStatus::Success);
        assert_eq!(back.step("fail").unwrap().retry_count, 1);
        assert_eq!(back.step("ok").unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn outcome_is_persisted_before_run_leaves_running_table() {
        let (store, rt) = setup().await;
        let manager = TaskManager::builder(Arc::clone(&store), Arc::new(rt.clone())).build();
        let gate = Arc::new(Gate::default());
        rt.callbacks().register("gate", gate.clone());

        let mut t = task(&["ok"]);
        t.call_back_func_name = "gate".into();
        let id = manager.dispatch(t).await.unwrap();
        gate.entered.notified().await;

        // Finished and out of the running table while its callback still runs.
        assert_eq!(store.get_task(&id).await.unwrap().status, TaskStatus::Success);
        assert_eq!(rt.running(), 0);
        assert!(!rt.terminate(&id).await);
        let err = manager.force_terminate(&id, "op").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));

        gate.release.notify_one();
        assert_eq!(store.get_task(&id).await.unwrap().status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn runs_of_one_resource_share_a_slot() {
        let mut a = task(&["ok"]);
        a.task_index = "fed/ns".into();
        let mut b = task(&["ok2"]);
        b.task_index = "fed/ns".into();
        let c = task(&["ok"]);

        assert_eq!(LocalRuntime::slot(&a), LocalRuntime::slot(&b));
        assert_eq!(LocalRuntime::slot(&a), "task/test/fed/ns");
        assert_eq!(LocalRuntime::slot(&c), format!("task/test/{}", c.task_id));
    }
}
