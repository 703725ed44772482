use std::{
    collections::HashSet,
    sync::{Arc, Mutex, OnceLock},
};

use taskvisor::{
    BackoffPolicy, ControllerConfig, ControllerSpec, RestartPolicy,
    Supervisor, SupervisorConfig, TaskRef, TaskSpec,
};
use tracing::{debug, info, instrument};

use crate::error::CoreError;

/// What the supervisor does when a slot is busy at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run after whatever occupies the slot has finished.
    Queue,
    /// Cancel the occupant and run this one instead.
    Replace,
    /// Discard this submission while the slot is busy.
    DropIfRunning,
}

/// Handle to the process-wide taskvisor supervisor.
///
/// Workflow executions and sync controllers both run as supervised one-shot tasks; the supervisor
/// owns their tokio tasks and reports their lifecycle to its subscribers.
#[derive(Clone)]
pub struct SupervisorApi {
    sup: Arc<Supervisor>,
}

impl SupervisorApi {
    /// Build a supervisor with the admission controller enabled and start its loop in the background.
    pub async fn new_default(subscribers: Vec<Arc<dyn taskvisor::Subscribe>>) -> Self {
        let sup = Supervisor::builder(SupervisorConfig::default())
            .with_controller(ControllerConfig::default())
            .with_subscribers(subscribers)
            .build();

        let runner = Arc::clone(&sup);
        tokio::spawn(async move {
            let _ = runner.run(Vec::new()).await;
        });
        sup.wait_ready().await;

        info!("supervisor is ready");
        Self { sup }
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::clone(&self.sup)
    }

    /// Run `task` once, never restarted, under `admission` for its slot.
    #[instrument(level = "debug", skip(self, task))]
    pub async fn submit(&self, task: TaskRef, admission: Admission) -> Result<(), CoreError> {
        let spec = TaskSpec::new(task, RestartPolicy::Never, BackoffPolicy::default(), None);
        let cspec = match admission {
            Admission::Queue => ControllerSpec::queue(spec),
            Admission::Replace => ControllerSpec::replace(spec),
            Admission::DropIfRunning => ControllerSpec::drop_if_running(spec),
        };

        debug!("submitting via controller");
        self.sup
            .submit(cspec)
            .await
            .map_err(|e| CoreError::Supervisor(e.to_string()))
    }
}

/// Slot names live as long as the supervisor; each distinct name is allocated once.
pub fn slot_name(name: &str) -> &'static str {
    static SLOTS: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();

    let mut slots = SLOTS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    if let Some(known) = slots.get(name) {
        return known;
    }
    let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
    slots.insert(leaked);
    leaked
}
