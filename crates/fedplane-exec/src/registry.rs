use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use fedplane_model::{Params, Step, Task};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::ExecResult;

/// Input of one step execution.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Snapshot of the task, including extras produced by earlier steps.
    pub task: Task,
    pub step: Step,
    /// Cancelled on force-termination.
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn step_param(&self, key: &str) -> Option<&str> {
        self.step.params.get(key).map(String::as_str)
    }
}

/// Executes one named step. Returned params are stored as the step's extras.
#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params>;
}

/// Runs with the final task once it reaches a terminal status.
#[async_trait]
pub trait TaskCallback: Send + Sync + 'static {
    async fn call(&self, task: &Task) -> ExecResult<()>;
}

/// Name-keyed lookup table shared by step handlers and callbacks.
pub struct Registry<T: ?Sized> {
    entries: Arc<RwLock<HashMap<String, Arc<T>>>>,
}

pub type HandlerRegistry = Registry<dyn StepHandler>;
pub type CallbackRegistry = Registry<dyn TaskCallback>;

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, entry: Arc<T>) -> &Self {
        let name = name.into();
        if let Ok(mut entries) = self.entries.write() {
            trace!(%name, "registered");
            entries.insert(name, entry);
        }
        self
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.entries
            .write()
            .map(|mut e| e.remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().ok()?.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl StepHandler for Echo {
        async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
            Ok(ctx.step.params.clone())
        }
    }

    #[test]
    fn register_lookup_unregister() {
        let reg = HandlerRegistry::new();
        reg.register("echo", Arc::new(Echo));
        assert!(reg.is_registered("echo"));
        assert_eq!(reg.count(), 1);

        let clone = reg.clone();
        assert!(clone.unregister("echo"));
        assert!(!reg.is_registered("echo"));
        assert!(!reg.unregister("echo"));
    }
}
