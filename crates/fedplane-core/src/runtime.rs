use async_trait::async_trait;
use fedplane_model::{Task, TaskId};

use crate::error::CoreError;

/// Step-execution runtime the task manager hands persisted tasks to.
///
/// `start` must return once execution has been scheduled; progress is reported by patching the task in the store.
#[async_trait]
pub trait StepRuntime: Send + Sync + 'static {
    async fn start(&self, task: Task) -> Result<(), CoreError>;

    /// Ask a running task to stop. Returns `false` when the runtime is not executing it.
    async fn terminate(&self, task_id: &TaskId) -> bool;
}
