use std::{collections::BTreeMap, sync::Arc, time::Duration};

use fedplane_core::{
    BuildContext, CoreError, MetricsBackend, NoopMetrics, TaskBuilder, TaskManager, TickOutcome,
    builder::{HandleNamespaceQuota, QuotaRequest, QuotaTarget},
};
use fedplane_model::{Namespace, SubClusterFlavor, TaskId, TaskStatus, annotations};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::SyncError;

/// Collaborators shared by every sync controller.
pub struct SyncDeps {
    pub manager: Arc<TaskManager>,
    pub ctx: BuildContext,
    pub metrics: Arc<dyn MetricsBackend>,
    /// Creator of dispatched sync tasks.
    pub instance: String,
}

impl SyncDeps {
    pub fn new(manager: Arc<TaskManager>, ctx: BuildContext, instance: impl Into<String>) -> Self {
        Self {
            manager,
            ctx,
            metrics: Arc::new(NoopMetrics),
            instance: instance.into(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsBackend>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Namespaces listed on the host cluster.
    pub namespaces: usize,
    pub dispatched: Vec<TaskId>,
    pub skipped: usize,
    pub failed: usize,
}

/// State of a federated namespace on one member cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberState {
    /// Missing or behind the host namespace.
    Stale,
    InSync,
    /// A same-named namespace that the federation does not own.
    Independent,
}

/// Converges the federated namespaces of one federation onto its member clusters.
#[derive(Clone)]
pub struct SyncController {
    fed_cluster_id: String,
    host_cluster_id: String,
    deps: Arc<SyncDeps>,
}

impl SyncController {
    pub fn new(
        fed_cluster_id: impl Into<String>,
        host_cluster_id: impl Into<String>,
        deps: Arc<SyncDeps>,
    ) -> Self {
        Self {
            fed_cluster_id: fed_cluster_id.into(),
            host_cluster_id: host_cluster_id.into(),
            deps,
        }
    }

    pub fn fed_cluster_id(&self) -> &str {
        &self.fed_cluster_id
    }

    pub fn host_cluster_id(&self) -> &str {
        &self.host_cluster_id
    }

    /// Tick every `interval` until `cancel` fires. The first tick runs immediately.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(fed_cluster_id = %self.fed_cluster_id, "sync controller started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(fed_cluster_id = %self.fed_cluster_id, error = %e, "sync tick failed");
                    }
                }
            }
        }
        debug!(fed_cluster_id = %self.fed_cluster_id, "sync controller stopped");
    }

    /// One reconciliation pass over the host cluster's namespaces.
    ///
    /// Only a failure to list namespaces fails the tick; per-namespace and per-member errors are logged and counted.
    #[instrument(level = "debug", skip(self), fields(fed_cluster_id = %self.fed_cluster_id))]
    pub async fn tick(&self) -> Result<TickReport, SyncError> {
        let namespaces = match self
            .deps
            .ctx
            .inventory
            .list_namespaces(&self.host_cluster_id)
            .await
        {
            Ok(namespaces) => namespaces,
            Err(e) => {
                self.deps
                    .metrics
                    .sync_tick(&self.fed_cluster_id, TickOutcome::Failed);
                return Err(e.into());
            }
        };
        if namespaces.is_empty() {
            info!(host_cluster_id = %self.host_cluster_id, "no namespaces on host cluster");
            self.deps
                .metrics
                .sync_tick(&self.fed_cluster_id, TickOutcome::Idle);
            return Ok(TickReport::default());
        }

        let mut report = TickReport {
            namespaces: namespaces.len(),
            ..Default::default()
        };
        for ns in &namespaces {
            if let Err(e) = self.sync_namespace(ns, &mut report).await {
                report.failed += 1;
                warn!(namespace = %ns.name, error = %e, "namespace sync failed");
            }
        }
        self.deps
            .metrics
            .sync_tick(&self.fed_cluster_id, TickOutcome::Completed);
        debug!(
            dispatched = report.dispatched.len(),
            skipped = report.skipped,
            failed = report.failed,
            "sync tick finished"
        );
        Ok(report)
    }

    async fn sync_namespace(
        &self,
        ns: &Namespace,
        report: &mut TickReport,
    ) -> Result<(), CoreError> {
        if !ns.is_federated() {
            return Ok(());
        }
        if self.creation_in_progress(ns).await {
            info!(namespace = %ns.name, "creation task still running; skipping");
            report.skipped += 1;
            return Ok(());
        }

        let members = self.selected_members(ns).await?;
        if members.is_empty() {
            debug!(namespace = %ns.name, "no valid sub clusters selected");
            report.skipped += 1;
            return Ok(());
        }

        let request = self.host_request(ns).await?;
        for sub in &members {
            match self.sync_member(ns, sub, &request).await {
                Ok(Some(task_id)) => report.dispatched.push(task_id),
                Ok(None) => report.skipped += 1,
                Err(e) if e.is_conflict() => {
                    debug!(namespace = %ns.name, sub_cluster_id = %sub, error = %e, "sync already in flight");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(namespace = %ns.name, sub_cluster_id = %sub, error = %e, "sub cluster sync failed");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// True when the namespace's create task is still initialising or running.
    ///
    /// Any lookup failure lets the namespace through.
    async fn creation_in_progress(&self, ns: &Namespace) -> bool {
        let Some(raw) = ns.annotation(annotations::CREATE_TASK_ID) else {
            return false;
        };
        match self.deps.manager.get_task_with_id(&TaskId::from(raw)).await {
            Ok(task) => matches!(task.status, TaskStatus::Init | TaskStatus::Running),
            Err(e) => {
                debug!(namespace = %ns.name, task_id = %raw, error = %e, "create task lookup failed; proceeding");
                false
            }
        }
    }

    /// Valid members of the federation selected by the namespace's cluster affinity.
    ///
    /// Read fresh on every tick.
    async fn selected_members(&self, ns: &Namespace) -> Result<Vec<String>, CoreError> {
        let affinity = ns.cluster_affinity()?;
        if affinity.is_empty() {
            return Ok(Vec::new());
        }
        let subs = self
            .deps
            .ctx
            .federations
            .list_sub_clusters(&self.fed_cluster_id)
            .await?;

        let mut out = Vec::new();
        for sub in subs.into_iter().filter(|s| s.is_valid()) {
            let labels = if affinity.needs_labels() {
                self.deps
                    .ctx
                    .inventory
                    .get_managed_cluster_labels(&self.host_cluster_id, &sub.sub_cluster_id)
                    .await?
            } else {
                BTreeMap::new()
            };
            if affinity.matches(&sub.sub_cluster_id, &labels) {
                out.push(sub.sub_cluster_id);
            }
        }
        Ok(out)
    }

    /// Desired state of the members, taken from the host namespace and its quota.
    async fn host_request(&self, ns: &Namespace) -> Result<QuotaRequest, CoreError> {
        let hard = self
            .deps
            .ctx
            .inventory
            .get_quota(&self.host_cluster_id, &ns.name, &ns.name)
            .await?
            .map(|q| q.hard)
            .unwrap_or_default();
        Ok(QuotaRequest {
            labels: ns.labels.clone(),
            annotations: BTreeMap::new(),
            hard,
        })
    }

    async fn member_state(&self, ns: &Namespace, sub: &str) -> Result<MemberState, CoreError> {
        let Some(existing) = self.deps.ctx.inventory.get_namespace(sub, &ns.name).await? else {
            return Ok(MemberState::Stale);
        };
        if !existing.is_federated() {
            return Ok(MemberState::Independent);
        }
        match ns.annotation(annotations::LAST_UPDATE_TIMESTAMP) {
            Some(ts) if existing.annotation(annotations::LAST_UPDATE_TIMESTAMP) == Some(ts) => {
                Ok(MemberState::InSync)
            }
            _ => Ok(MemberState::Stale),
        }
    }

    /// Dispatch a single-member sync task when the member is behind. `None` means nothing to do.
    async fn sync_member(
        &self,
        ns: &Namespace,
        sub: &str,
        request: &QuotaRequest,
    ) -> Result<Option<TaskId>, CoreError> {
        match self.member_state(ns, sub).await? {
            MemberState::InSync => {
                debug!(namespace = %ns.name, sub_cluster_id = %sub, "in sync");
                return Ok(None);
            }
            MemberState::Independent => {
                error!(namespace = %ns.name, sub_cluster_id = %sub, "namespace already exists on sub cluster as an independent namespace");
                return Ok(None);
            }
            MemberState::Stale => {}
        }

        let labels = self
            .deps
            .ctx
            .inventory
            .get_managed_cluster_labels(&self.host_cluster_id, sub)
            .await?;
        let flavor = SubClusterFlavor::from_labels(&labels)?;
        let targets = BTreeMap::from([(QuotaTarget::Flavor(flavor), request.clone())]);
        let task = HandleNamespaceQuota::from_targets(&self.fed_cluster_id, &ns.name, &targets)?
            .with_sub_cluster(sub)
            .build_task(&self.deps.ctx, &self.deps.instance)
            .await?;

        let task_id = self.deps.manager.dispatch_unique(task).await?;
        self.deps.metrics.sync_task_dispatched(flavor);
        info!(namespace = %ns.name, sub_cluster_id = %sub, %flavor, %task_id, "sync task dispatched");

        if let Err(e) = self.stamp_task_id(&ns.name, &task_id).await {
            warn!(namespace = %ns.name, %task_id, error = %e, "failed to record sync task on namespace");
        }
        Ok(Some(task_id))
    }

    async fn stamp_task_id(&self, namespace: &str, task_id: &TaskId) -> Result<(), CoreError> {
        let stamp = BTreeMap::from([(
            annotations::CREATE_TASK_ID.to_string(),
            task_id.to_string(),
        )]);
        let found = self
            .deps
            .ctx
            .inventory
            .patch_namespace_annotations(&self.host_cluster_id, namespace, &stamp)
            .await?;
        if !found {
            debug!(namespace, "namespace vanished before its sync task could be recorded");
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use fedplane_core::{
        ClusterInventory, WorkflowParams,
        builder::NamespaceQuotaParams,
        memory::{MemoryClusterInventory, StaticProjectService},
    };
    use fedplane_model::{Cluster, MANAGED_CLUSTER_TYPE_LABEL, ResourceQuota, Step, Task};

    use super::{testutil::*, *};

    fn controller(env: &Env) -> SyncController {
        SyncController::new("F1", "H1", env.deps.clone())
    }

    #[tokio::test]
    async fn range_limits_targets_to_registered_members() {
        let env = env();
        put_host_quota(&env.inventory, "8").await;

        let report = controller(&env).tick().await.unwrap();
        assert_eq!(report.namespaces, 2);
        assert_eq!(report.dispatched.len(), 1);

        let started = env.runtime.started.lock().unwrap().clone();
        assert_eq!(started.len(), 1);
        let task = &started[0];
        assert_eq!(task.task_index, "F1/team-a/A");
        let params = NamespaceQuotaParams::from_task(task).unwrap();
        assert_eq!(params.sub_cluster_id.as_deref(), Some("A"));
        assert_eq!(
            task.step_sequence,
            vec![
                "validateNamespaceQuota",
                "handleNormalNamespaceQuota",
                "updateFederationNamespaceStatus",
            ]
        );
        let request = QuotaRequest::from_step(task.step("handleNormalNamespaceQuota").unwrap())
            .unwrap();
        assert_eq!(request.hard["requests.cpu"], "8");

        let host = env.inventory.get_namespace("H1", "team-a").await.unwrap().unwrap();
        assert_eq!(
            host.annotation(annotations::CREATE_TASK_ID),
            Some(task.task_id.as_str())
        );
    }

    #[tokio::test]
    async fn running_create_task_skips_namespace() {
        let env = env();
        let mut running = Task::new("HandleNamespaceQuota", "create team-a");
        running.push_step(Step::new("validateNamespaceQuota", "validate"));
        running.status = TaskStatus::Running;
        env.deps.manager.store().create_task(&running).await.unwrap();
        env.inventory
            .put_namespace(
                "H1",
                Namespace::new("team-a")
                    .with_annotation(annotations::FEDERATED_FLAG, "true")
                    .with_annotation(annotations::CLUSTER_RANGE, "a")
                    .with_annotation(annotations::CREATE_TASK_ID, running.task_id.as_str()),
            )
            .unwrap();

        let report = controller(&env).tick().await.unwrap();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.skipped, 1);
        assert!(env.runtime.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_create_task_does_not_block() {
        let env = env();
        env.inventory
            .put_namespace(
                "H1",
                Namespace::new("team-a")
                    .with_annotation(annotations::FEDERATED_FLAG, "true")
                    .with_annotation(annotations::CLUSTER_RANGE, "A")
                    .with_annotation(annotations::CREATE_TASK_ID, "gone"),
            )
            .unwrap();

        let report = controller(&env).tick().await.unwrap();
        assert_eq!(report.dispatched.len(), 1);
    }

    #[tokio::test]
    async fn second_tick_dispatches_nothing() {
        let env = env();
        let ctl = controller(&env);

        assert_eq!(ctl.tick().await.unwrap().dispatched.len(), 1);
        let second = ctl.tick().await.unwrap();
        assert!(second.dispatched.is_empty());
        assert_eq!(env.runtime.started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn independent_namespace_is_skipped_without_failing_tick() {
        let env = env();
        env.inventory
            .put_namespace("A", Namespace::new("team-a"))
            .unwrap();

        let report = controller(&env).tick().await.unwrap();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn member_with_host_timestamp_is_in_sync() {
        let env = env();
        env.inventory
            .put_namespace(
                "H1",
                Namespace::new("team-a")
                    .with_annotation(annotations::FEDERATED_FLAG, "true")
                    .with_annotation(annotations::CLUSTER_RANGE, "A")
                    .with_annotation(annotations::LAST_UPDATE_TIMESTAMP, "2024-01-01T00:00:00Z"),
            )
            .unwrap();
        env.inventory
            .put_namespace(
                "A",
                Namespace::new("team-a")
                    .with_annotation(annotations::FEDERATED_FLAG, "true")
                    .with_annotation(annotations::LAST_UPDATE_TIMESTAMP, "2024-01-01T00:00:00Z"),
            )
            .unwrap();

        let report = controller(&env).tick().await.unwrap();
        assert!(report.dispatched.is_empty());
    }

    #[tokio::test]
    async fn selector_affinity_dispatches_to_labelled_members() {
        let env = env();
        env.inventory
            .put_namespace(
                "H1",
                Namespace::new("team-a")
                    .with_annotation(annotations::FEDERATED_FLAG, "true")
                    .with_annotation(annotations::CLUSTER_RANGE, "a")
                    .with_annotation(annotations::CLUSTER_AFFINITY_MODE, "selector")
                    .with_annotation(annotations::CLUSTER_AFFINITY_SELECTOR, "zone=gz"),
            )
            .unwrap();
        env.inventory
            .set_managed_cluster_labels(
                "H1",
                "C",
                BTreeMap::from([
                    (MANAGED_CLUSTER_TYPE_LABEL.to_string(), "suanli".to_string()),
                    ("zone".to_string(), "gz".to_string()),
                ]),
            )
            .unwrap();

        let report = controller(&env).tick().await.unwrap();
        assert_eq!(report.dispatched.len(), 1);
        let started = env.runtime.started.lock().unwrap().clone();
        assert_eq!(started[0].task_index, "F1/team-a/C");
    }

    #[tokio::test]
    async fn unknown_affinity_mode_counts_as_failed_namespace() {
        let env = env();
        env.inventory
            .put_namespace(
                "H1",
                Namespace::new("team-a")
                    .with_annotation(annotations::FEDERATED_FLAG, "true")
                    .with_annotation(annotations::CLUSTER_AFFINITY_MODE, "nearest"),
            )
            .unwrap();

        let report = controller(&env).tick().await.unwrap();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.failed, 1);
    }

    const WRITES: &str = "test/concurrent-writes";

    /// After every read of a host namespace, a concurrent writer bumps a counter annotation on it.
    struct WriteAfterRead {
        inner: MemoryClusterInventory,
        writes: AtomicUsize,
    }

    impl WriteAfterRead {
        async fn bump(&self, id: &str, name: &str) -> Result<(), CoreError> {
            if id != "H1" {
                return Ok(());
            }
            let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            let patch = BTreeMap::from([(WRITES.to_string(), n.to_string())]);
            self.inner.patch_namespace_annotations(id, name, &patch).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ClusterInventory for WriteAfterRead {
        async fn get_cluster(&self, id: &str) -> Result<Cluster, CoreError> {
            self.inner.get_cluster(id).await
        }
        async fn get_managed_cluster_labels(
            &self,
            host: &str,
            sub: &str,
        ) -> Result<BTreeMap<String, String>, CoreError> {
            self.inner.get_managed_cluster_labels(host, sub).await
        }
        async fn list_namespaces(&self, id: &str) -> Result<Vec<Namespace>, CoreError> {
            let read = self.inner.list_namespaces(id).await?;
            self.bump(id, "team-a").await?;
            Ok(read)
        }
        async fn get_namespace(&self, id: &str, name: &str) -> Result<Option<Namespace>, CoreError> {
            let read = self.inner.get_namespace(id, name).await?;
            self.bump(id, name).await?;
            Ok(read)
        }
        async fn create_namespace(&self, id: &str, ns: &Namespace) -> Result<(), CoreError> {
            self.inner.create_namespace(id, ns).await
        }
        async fn update_namespace(&self, id: &str, ns: &Namespace) -> Result<(), CoreError> {
            self.inner.update_namespace(id, ns).await
        }
        async fn patch_namespace_annotations(
            &self,
            id: &str,
            name: &str,
            patch: &BTreeMap<String, String>,
        ) -> Result<bool, CoreError> {
            self.inner.patch_namespace_annotations(id, name, patch).await
        }
        async fn delete_namespace(&self, id: &str, name: &str) -> Result<(), CoreError> {
            self.inner.delete_namespace(id, name).await
        }
        async fn get_quota(
            &self,
            id: &str,
            ns: &str,
            name: &str,
        ) -> Result<Option<ResourceQuota>, CoreError> {
            self.inner.get_quota(id, ns, name).await
        }
        async fn apply_quota(&self, id: &str, quota: &ResourceQuota) -> Result<(), CoreError> {
            self.inner.apply_quota(id, quota).await
        }
        async fn delete_quota(&self, id: &str, ns: &str, name: &str) -> Result<(), CoreError> {
            self.inner.delete_quota(id, ns, name).await
        }
    }

    #[tokio::test]
    async fn stamp_keeps_annotations_written_concurrently() {
        let env = env();
        let writer = Arc::new(WriteAfterRead {
            inner: env.inventory.clone(),
            writes: AtomicUsize::new(0),
        });
        let ctx = BuildContext::new(
            Arc::new(env.federations.clone()),
            writer.clone(),
            Arc::new(StaticProjectService::new()),
        );
        let deps = Arc::new(SyncDeps::new(env.deps.manager.clone(), ctx, "test"));

        let report = SyncController::new("F1", "H1", deps).tick().await.unwrap();
        assert_eq!(report.dispatched.len(), 1);
        let host = env.inventory.get_namespace("H1", "team-a").await.unwrap().unwrap();
        assert_eq!(
            host.annotation(annotations::CREATE_TASK_ID),
            Some(report.dispatched[0].as_str())
        );
        assert_eq!(host.annotation(annotations::CLUSTER_RANGE), Some("a,b"));
        let writes = writer.writes.load(Ordering::SeqCst);
        assert!(writes > 0);
        assert_eq!(host.annotation(WRITES), Some(writes.to_string().as_str()));
    }

    #[tokio::test]
    async fn empty_host_is_an_idle_tick() {
        let env = env();
        let ctl = SyncController::new("F1", "H-empty", env.deps.clone());
        assert_eq!(ctl.tick().await.unwrap(), TickReport::default());
    }

    #[tokio::test]
    async fn unreachable_host_fails_tick() {
        let env = env();
        env.inventory.set_unreachable("H1", true).unwrap();
        assert!(matches!(
            controller(&env).tick().await,
            Err(SyncError::Core(CoreError::Collaborator(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_cancelled() {
        let env = env();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(controller(&env).run(Duration::from_secs(60), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(env.runtime.started.lock().unwrap().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
