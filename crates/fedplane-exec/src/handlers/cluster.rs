use std::sync::Arc;

use async_trait::async_trait;
use fedplane_core::{ClusterInventory, FederationStore, builder::keys};
use fedplane_model::{ClusterStatus, Params};
use tracing::info;

use crate::{
    error::{ExecError, ExecResult},
    registry::{StepContext, StepHandler},
};

fn task_param<'a>(ctx: &'a StepContext, key: &str) -> ExecResult<&'a str> {
    ctx.task
        .param(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ExecError::InvalidInput(format!("task parameter {key} is missing")))
}

/// Verifies that the cluster named by a task parameter exists and is usable.
pub struct CheckCluster {
    inventory: Arc<dyn ClusterInventory>,
    param_key: &'static str,
}

impl CheckCluster {
    /// Checks the cluster of an install (`clusterId`).
    pub fn host(inventory: Arc<dyn ClusterInventory>) -> Self {
        Self {
            inventory,
            param_key: keys::CLUSTER_ID,
        }
    }

    /// Checks the member of a registration (`subClusterId`).
    pub fn sub(inventory: Arc<dyn ClusterInventory>) -> Self {
        Self {
            inventory,
            param_key: keys::SUB_CLUSTER_ID,
        }
    }
}

#[async_trait]
impl StepHandler for CheckCluster {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let cluster_id = task_param(ctx, self.param_key)?;
        let cluster = self.inventory.get_cluster(cluster_id).await?;
        match cluster.status {
            ClusterStatus::Deleting | ClusterStatus::Deleted | ClusterStatus::Failed => Err(
                ExecError::Failed(format!("cluster {cluster_id} is {}", cluster.status)),
            ),
            _ => Ok(Params::from([(
                keys::CLUSTER_NAME.to_string(),
                cluster.cluster_name,
            )])),
        }
    }
}

/// Verifies that the sub-cluster record exists before removal.
pub struct CheckSubClusterRemovable {
    federations: Arc<dyn FederationStore>,
}

impl CheckSubClusterRemovable {
    pub fn new(federations: Arc<dyn FederationStore>) -> Self {
        Self { federations }
    }
}

#[async_trait]
impl StepHandler for CheckSubClusterRemovable {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let fed = task_param(ctx, keys::FED_CLUSTER_ID)?;
        let sub = task_param(ctx, keys::SUB_CLUSTER_ID)?;
        let record = self.federations.get_sub_cluster(fed, sub).await?;
        if record.status == ClusterStatus::Creating {
            return Err(ExecError::Failed(format!(
                "sub cluster {sub} is still being registered"
            )));
        }
        self.federations
            .update_sub_cluster_status(fed, sub, ClusterStatus::Deleting)
            .await?;
        Ok(Params::new())
    }
}

/// Marks the registered sub-cluster as running.
pub struct UpdateSubClusterStatus {
    federations: Arc<dyn FederationStore>,
}

impl UpdateSubClusterStatus {
    pub fn new(federations: Arc<dyn FederationStore>) -> Self {
        Self { federations }
    }
}

#[async_trait]
impl StepHandler for UpdateSubClusterStatus {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let fed = task_param(ctx, keys::FED_CLUSTER_ID)?;
        let sub = task_param(ctx, keys::SUB_CLUSTER_ID)?;
        self.federations
            .update_sub_cluster_status(fed, sub, ClusterStatus::Running)
            .await?;
        info!(fed_cluster_id = %fed, sub_cluster_id = %sub, "sub cluster running");
        Ok(Params::new())
    }
}

/// Marks a sub-cluster record as deleted once its managed cluster is gone.
pub struct DeleteSubClusterRecord {
    federations: Arc<dyn FederationStore>,
}

impl DeleteSubClusterRecord {
    pub fn new(federations: Arc<dyn FederationStore>) -> Self {
        Self { federations }
    }
}

#[async_trait]
impl StepHandler for DeleteSubClusterRecord {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let fed = task_param(ctx, keys::FED_CLUSTER_ID)?;
        let sub = task_param(ctx, keys::SUB_CLUSTER_ID)?;
        self.federations
            .update_sub_cluster_status(fed, sub, ClusterStatus::Deleted)
            .await?;
        info!(fed_cluster_id = %fed, sub_cluster_id = %sub, "sub cluster record deleted");
        Ok(Params::new())
    }
}

/// Marks the federation as running after an install or a membership change.
///
/// Tasks carrying `fedClusterId` address the federation directly; installs resolve it from the host cluster.
pub struct UpdateFederationStatus {
    federations: Arc<dyn FederationStore>,
}

impl UpdateFederationStatus {
    pub fn new(federations: Arc<dyn FederationStore>) -> Self {
        Self { federations }
    }
}

#[async_trait]
impl StepHandler for UpdateFederationStatus {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let fed_cluster_id = match task_param(ctx, keys::FED_CLUSTER_ID) {
            Ok(fed) => self.federations.get_federation_cluster(fed).await?.fed_cluster_id,
            Err(_) => {
                let cluster_id = task_param(ctx, keys::CLUSTER_ID)?;
                self.federations
                    .find_federation_by_host(cluster_id)
                    .await?
                    .ok_or_else(|| {
                        ExecError::Failed(format!(
                            "no federation registered on cluster {cluster_id}"
                        ))
                    })?
                    .fed_cluster_id
            }
        };
        self.federations
            .update_federation_status(&fed_cluster_id, ClusterStatus::Running)
            .await?;
        info!(%fed_cluster_id, "federation running");
        Ok(Params::from([(
            keys::FED_CLUSTER_ID.to_string(),
            fed_cluster_id,
        )]))
    }
}

#[cfg(test)]
mod tests {
    use fedplane_core::memory::{MemoryClusterInventory, MemoryFederationStore};
    use fedplane_model::{Cluster, FederationCluster, Step, SubCluster, Task};
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn ctx_with(params: &[(&str, &str)]) -> StepContext {
        let mut task = Task::new("t", "t");
        for (k, v) in params {
            task.common_params.insert(k.to_string(), v.to_string());
        }
        StepContext {
            task,
            step: Step::new("s", "s"),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn check_cluster_rejects_deleting() {
        let inv = MemoryClusterInventory::new();
        inv.upsert_cluster(Cluster {
            cluster_id: "c1".into(),
            cluster_name: "one".into(),
            status: ClusterStatus::Deleting,
            ..Default::default()
        })
        .unwrap();
        let err = CheckCluster::host(Arc::new(inv))
            .run(&ctx_with(&[(keys::CLUSTER_ID, "c1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Failed(_)));
    }

    #[tokio::test]
    async fn federation_and_sub_cluster_status_updates() {
        let feds = MemoryFederationStore::new();
        feds.upsert_federation(FederationCluster {
            fed_cluster_id: "F1".into(),
            host_cluster_id: "c1".into(),
            status: ClusterStatus::Creating,
            ..Default::default()
        })
        .unwrap();
        feds.upsert_sub_cluster(SubCluster {
            fed_cluster_id: "F1".into(),
            sub_cluster_id: "S1".into(),
            status: ClusterStatus::Creating,
            ..Default::default()
        })
        .unwrap();
        let store: Arc<dyn FederationStore> = Arc::new(feds.clone());

        let extras = UpdateFederationStatus::new(store.clone())
            .run(&ctx_with(&[(keys::CLUSTER_ID, "c1")]))
            .await
            .unwrap();
        assert_eq!(extras[keys::FED_CLUSTER_ID], "F1");

        let sub_ctx = ctx_with(&[(keys::FED_CLUSTER_ID, "F1"), (keys::SUB_CLUSTER_ID, "S1")]);
        assert!(
            CheckSubClusterRemovable::new(store.clone())
                .run(&sub_ctx)
                .await
                .is_err()
        );
        UpdateSubClusterStatus::new(store.clone())
            .run(&sub_ctx)
            .await
            .unwrap();

        assert_eq!(
            feds.get_federation_cluster("F1").await.unwrap().status,
            ClusterStatus::Running
        );
        assert_eq!(
            feds.get_sub_cluster("F1", "S1").await.unwrap().status,
            ClusterStatus::Running
        );

        CheckSubClusterRemovable::new(store.clone())
            .run(&sub_ctx)
            .await
            .unwrap();
        DeleteSubClusterRecord::new(store.clone())
            .run(&sub_ctx)
            .await
            .unwrap();
        UpdateFederationStatus::new(store)
            .run(&sub_ctx)
            .await
            .unwrap();
        assert_eq!(
            feds.get_sub_cluster("F1", "S1").await.unwrap().status,
            ClusterStatus::Deleted
        );
    }
}
