use fedplane_core::{MetricsBackend, RetryMode, TickOutcome};
use fedplane_model::{SubClusterFlavor, TaskStatus};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};

/// Step and task durations range from sub-second checks to hour-long installs.
const DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0];

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    tasks_dispatched: IntCounterVec,
    tasks_retried: IntCounterVec,
    steps_finished: IntCounterVec,
    step_duration: HistogramVec,
    tasks_finished: IntCounterVec,
    task_duration: HistogramVec,
    sync_ticks: IntCounterVec,
    sync_tasks: IntCounterVec,
    controllers: IntGauge,
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, prometheus::Error> {
    let c = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn histogram(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<HistogramVec, prometheus::Error> {
    let h = HistogramVec::new(
        HistogramOpts::new(name, help).buckets(DURATION_BUCKETS.to_vec()),
        labels,
    )?;
    registry.register(Box::new(h.clone()))?;
    Ok(h)
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register every metric on `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let controllers = IntGauge::new(
            "fedplane_sync_controllers_running",
            "Sync controllers currently running",
        )?;
        registry.register(Box::new(controllers.clone()))?;

        Ok(Self {
            tasks_dispatched: counter(
                &registry,
                "fedplane_tasks_dispatched_total",
                "Tasks handed to the runtime",
                &["task_type"],
            )?,
            tasks_retried: counter(
                &registry,
                "fedplane_tasks_retried_total",
                "Failed tasks retried",
                &["task_type", "mode"],
            )?,
            steps_finished: counter(
                &registry,
                "fedplane_steps_finished_total",
                "Steps that reached a final status",
                &["task_type", "step", "status"],
            )?,
            step_duration: histogram(
                &registry,
                "fedplane_step_duration_seconds",
                "Step execution time",
                &["task_type", "step"],
            )?,
            tasks_finished: counter(
                &registry,
                "fedplane_tasks_finished_total",
                "Tasks that reached a terminal status",
                &["task_type", "status"],
            )?,
            task_duration: histogram(
                &registry,
                "fedplane_task_duration_seconds",
                "Task execution time",
                &["task_type"],
            )?,
            sync_ticks: counter(
                &registry,
                "fedplane_sync_ticks_total",
                "Namespace sync ticks by outcome",
                &["fed_cluster_id", "outcome"],
            )?,
            sync_tasks: counter(
                &registry,
                "fedplane_sync_tasks_dispatched_total",
                "Namespace sync tasks dispatched by sub-cluster flavor",
                &["flavor"],
            )?,
            controllers,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Current values in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn task_dispatched(&self, task_type: &str) {
        self.tasks_dispatched.with_label_values(&[task_type]).inc();
    }

    fn task_retried(&self, task_type: &str, mode: RetryMode) {
        self.tasks_retried
            .with_label_values(&[task_type, mode.as_str()])
            .inc();
    }

    fn step_finished(&self, task_type: &str, step: &str, status: TaskStatus, secs: u64) {
        self.steps_finished
            .with_label_values(&[task_type, step, status.as_str()])
            .inc();
        self.step_duration
            .with_label_values(&[task_type, step])
            .observe(secs as f64);
    }

    fn task_finished(&self, task_type: &str, status: TaskStatus, secs: u64) {
        self.tasks_finished
            .with_label_values(&[task_type, status.as_str()])
            .inc();
        self.task_duration
            .with_label_values(&[task_type])
            .observe(secs as f64);
    }

    fn sync_tick(&self, fed_cluster_id: &str, outcome: TickOutcome) {
        self.sync_ticks
            .with_label_values(&[fed_cluster_id, outcome.as_str()])
            .inc();
    }

    fn sync_task_dispatched(&self, flavor: SubClusterFlavor) {
        self.sync_tasks.with_label_values(&[flavor.as_str()]).inc();
    }

    fn controllers_running(&self, count: usize) {
        self.controllers.set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_labelled_values() {
        let m = PrometheusMetrics::new().unwrap();
        m.task_dispatched("InstallFederation");
        m.task_dispatched("InstallFederation");
        m.task_finished("InstallFederation", TaskStatus::Failure, 42);
        m.sync_task_dispatched(SubClusterFlavor::Taiji);
        m.controllers_running(3);

        assert_eq!(
            m.tasks_dispatched
                .with_label_values(&["InstallFederation"])
                .get(),
            2
        );
        assert_eq!(
            m.tasks_finished
                .with_label_values(&["InstallFederation", "Failure"])
                .get(),
            1
        );
        assert_eq!(m.controllers.get(), 3);

        let text = m.encode_text().unwrap();
        assert!(text.contains("fedplane_sync_tasks_dispatched_total{flavor=\"taiji\"} 1"));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        PrometheusMetrics::with_registry(registry.clone()).unwrap();
        assert!(PrometheusMetrics::with_registry(registry).is_err());
    }
}
