use std::{collections::BTreeMap, sync::Arc, time::Duration};

use fedplane_core::{Admission, SupervisorApi, supervisor::slot_name};
use taskvisor::{TaskError, TaskFn, TaskRef};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::SyncConfig,
    controller::{SyncController, SyncDeps},
    error::SyncError,
};

/// How long [`ControllerManager::stop_all`] waits for each controller loop to return.
const STOP_GRACE: Duration = Duration::from_secs(10);

struct Running {
    host_cluster_id: String,
    cancel: CancellationToken,
    /// Fires once the supervised run has returned or been dropped.
    exited: CancellationToken,
}

/// Keeps exactly one [`SyncController`] per known federation cluster.
///
/// Each controller loop is a supervised run in slot `sync/<fedClusterID>`.
/// The running table is owned by the manager loop; every change happens inside [`ControllerManager::reconcile`].
pub struct ControllerManager {
    deps: Arc<SyncDeps>,
    config: SyncConfig,
    supervisor: SupervisorApi,
    running: BTreeMap<String, Running>,
}

impl ControllerManager {
    pub fn new(deps: Arc<SyncDeps>, config: SyncConfig, supervisor: SupervisorApi) -> Self {
        Self {
            deps,
            config,
            supervisor,
            running: BTreeMap::new(),
        }
    }

    /// Federation ids with a running controller, sorted.
    pub fn running(&self) -> Vec<String> {
        self.running.keys().cloned().collect()
    }

    /// Reconcile every `manager_interval` until `cancel` fires, then stop all controllers.
    ///
    /// Always ends with [`SyncError::Shutdown`].
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SyncError> {
        let mut ticker = tokio::time::interval(self.config.manager_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.stop_all().await;
                    return Err(SyncError::Shutdown);
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile(&cancel).await {
                        warn!(error = %e, "controller reconcile failed");
                    }
                }
            }
        }
    }

    /// Diff the federation inventory against the running table.
    ///
    /// Controllers whose federation is gone, moved to another host, or whose loop has exited are stopped;
    /// every desired federation without a controller gets one, cancelled together with `parent`.
    #[instrument(level = "debug", skip_all)]
    pub async fn reconcile(&mut self, parent: &CancellationToken) -> Result<(), SyncError> {
        let desired: BTreeMap<String, String> = self
            .deps
            .ctx
            .federations
            .list_federation_clusters()
            .await?
            .into_iter()
            .map(|f| (f.fed_cluster_id, f.host_cluster_id))
            .collect();

        let stale: Vec<String> = self
            .running
            .iter()
            .filter(|(id, r)| {
                desired.get(*id) != Some(&r.host_cluster_id) || r.exited.is_cancelled()
            })
            .map(|(id, _)| id.clone())
            .collect();
        for fed_cluster_id in stale {
            if let Some(r) = self.running.remove(&fed_cluster_id) {
                r.cancel.cancel();
                info!(%fed_cluster_id, "sync controller stopped");
            }
        }

        for (fed_cluster_id, host_cluster_id) in desired {
            if self.running.contains_key(&fed_cluster_id) {
                continue;
            }
            if let Err(e) = self.start(fed_cluster_id.clone(), host_cluster_id, parent).await {
                warn!(%fed_cluster_id, error = %e, "sync controller not started");
            }
        }

        self.deps.metrics.controllers_running(self.running.len());
        debug!(running = self.running.len(), "controllers reconciled");
        Ok(())
    }

    async fn start(
        &mut self,
        fed_cluster_id: String,
        host_cluster_id: String,
        parent: &CancellationToken,
    ) -> Result<(), SyncError> {
        let cancel = parent.child_token();
        let exited = CancellationToken::new();
        let controller =
            SyncController::new(&fed_cluster_id, &host_cluster_id, Arc::clone(&self.deps));
        let run = supervised(
            controller,
            self.config.namespace_sync_interval,
            cancel.clone(),
            exited.clone(),
        );
        self.supervisor.submit(run, Admission::Replace).await?;

        info!(%fed_cluster_id, %host_cluster_id, "sync controller started");
        self.running.insert(
            fed_cluster_id,
            Running {
                host_cluster_id,
                cancel,
                exited,
            },
        );
        Ok(())
    }

    /// Cancel every controller and wait for its loop to exit.
    pub async fn stop_all(&mut self) {
        let running = std::mem::take(&mut self.running);
        for r in running.values() {
            r.cancel.cancel();
        }
        for (fed_cluster_id, r) in running {
            if tokio::time::timeout(STOP_GRACE, r.exited.cancelled())
                .await
                .is_err()
            {
                warn!(%fed_cluster_id, "sync controller did not stop within grace");
            }
        }
        self.deps.metrics.controllers_running(0);
        info!("all sync controllers stopped");
    }
}

/// The controller loop as a supervised run. It ends when `cancel` or the supervisor's token fires.
fn supervised(
    controller: SyncController,
    interval: Duration,
    cancel: CancellationToken,
    exited: CancellationToken,
) -> TaskRef {
    let slot = slot_name(&format!("sync/{}", controller.fed_cluster_id()));
    TaskFn::arc(slot, move |ctx: CancellationToken| {
        let controller = controller.clone();
        let cancel = cancel.clone();
        let exited = exited.clone();
        async move {
            let _exited = exited.drop_guard();
            if ctx.is_cancelled() {
                return Err(TaskError::Canceled);
            }

            let run = controller.run(interval, cancel.clone());
            tokio::pin!(run);
            tokio::select! {
                biased;
                _ = &mut run => return Ok(()),
                _ = ctx.cancelled() => cancel.cancel(),
            }
            run.await;
            Err(TaskError::Canceled)
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::controller::testutil::{add_federation, env};

    use super::*;

    async fn manager(deps: Arc<SyncDeps>) -> ControllerManager {
        ControllerManager::new(
            deps,
            SyncConfig {
                namespace_sync_interval: Duration::from_secs(300),
                manager_interval: Duration::from_secs(180),
                instance: "test".into(),
            },
            SupervisorApi::new_default(Vec::new()).await,
        )
    }

    #[tokio::test]
    async fn running_set_follows_inventory() {
        let env = env();
        add_federation(&env.federations, "F2", "H2");
        let parent = CancellationToken::new();
        let mut mgr = manager(env.deps.clone()).await;

        mgr.reconcile(&parent).await.unwrap();
        assert_eq!(mgr.running(), vec!["F1", "F2"]);

        env.federations.remove_federation("F2").unwrap();
        add_federation(&env.federations, "F3", "H3");
        mgr.reconcile(&parent).await.unwrap();
        assert_eq!(mgr.running(), vec!["F1", "F3"]);

        // Idempotent with no inventory change.
        mgr.reconcile(&parent).await.unwrap();
        assert_eq!(mgr.running(), vec!["F1", "F3"]);

        mgr.stop_all().await;
        assert!(mgr.running().is_empty());
    }

    #[tokio::test]
    async fn host_change_restarts_controller() {
        let env = env();
        let parent = CancellationToken::new();
        let mut mgr = manager(env.deps.clone()).await;
        mgr.reconcile(&parent).await.unwrap();
        let first = mgr.running["F1"].cancel.clone();

        add_federation(&env.federations, "F1", "H9");
        mgr.reconcile(&parent).await.unwrap();

        assert!(first.is_cancelled());
        assert_eq!(mgr.running["F1"].host_cluster_id, "H9");
        mgr.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_children_and_reports_shutdown() {
        let env = env();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(manager(env.deps.clone()).await.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(env.runtime.started.lock().unwrap().len(), 1);

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SyncError::Shutdown)));
    }

    #[tokio::test]
    async fn exited_controller_is_restarted() {
        let env = env();
        let parent = CancellationToken::new();
        let mut mgr = manager(env.deps.clone()).await;
        mgr.reconcile(&parent).await.unwrap();

        let first = mgr.running["F1"].cancel.clone();
        let exited = mgr.running["F1"].exited.clone();
        first.cancel();
        tokio::time::timeout(Duration::from_secs(5), exited.cancelled())
            .await
            .unwrap();

        mgr.reconcile(&parent).await.unwrap();
        assert_eq!(mgr.running(), vec!["F1"]);
        assert!(!mgr.running["F1"].cancel.is_cancelled());
        mgr.stop_all().await;
    }
}
