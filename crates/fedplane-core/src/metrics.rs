use fedplane_model::{SubClusterFlavor, TaskStatus};

/// How a retry chose its starting step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    All,
    At,
}

impl RetryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryMode::All => "all",
            RetryMode::At => "at",
        }
    }
}

/// Outcome of a single sync tick for one federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No namespaces on the host cluster.
    Idle,
    Completed,
    Failed,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Idle => "idle",
            TickOutcome::Completed => "completed",
            TickOutcome::Failed => "failed",
        }
    }
}

/// Metrics sink. Every method defaults to a no-op.
pub trait MetricsBackend: Send + Sync + 'static {
    fn task_dispatched(&self, _task_type: &str) {}

    fn task_retried(&self, _task_type: &str, _mode: RetryMode) {}

    fn step_finished(&self, _task_type: &str, _step: &str, _status: TaskStatus, _secs: u64) {}

    fn task_finished(&self, _task_type: &str, _status: TaskStatus, _secs: u64) {}

    fn sync_tick(&self, _fed_cluster_id: &str, _outcome: TickOutcome) {}

    fn sync_task_dispatched(&self, _flavor: SubClusterFlavor) {}

    fn controllers_running(&self, _count: usize) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsBackend for NoopMetrics {}
