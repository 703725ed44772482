use std::sync::Arc;

use async_trait::async_trait;
use fedplane_model::{ClusterStatus, Task};
use tracing::{debug, info};

use super::{
    InstallFederationParams, RegisterSubClusterParams, RemoveSubClusterParams, WorkflowParams,
};
use crate::{error::CoreError, inventory::FederationStore, manager::RetryHook};

/// Resets a federation record left behind by a failed install back to `creating`.
pub struct BeforeRetryInstallFederation {
    federations: Arc<dyn FederationStore>,
}

impl BeforeRetryInstallFederation {
    pub fn new(federations: Arc<dyn FederationStore>) -> Self {
        Self { federations }
    }
}

#[async_trait]
impl RetryHook for BeforeRetryInstallFederation {
    async fn before_retry(&self, task: &Task) -> Result<(), CoreError> {
        let params = InstallFederationParams::from_task(task)?;
        let Some(fed) = self
            .federations
            .find_federation_by_host(&params.cluster_id)
            .await?
        else {
            debug!(cluster_id = %params.cluster_id, "no federation record; nothing to reset");
            return Ok(());
        };
        self.federations
            .update_federation_status(&fed.fed_cluster_id, ClusterStatus::Creating)
            .await?;
        info!(fed_cluster_id = %fed.fed_cluster_id, "federation status reset to creating before retry");
        Ok(())
    }
}

/// Set the sub-cluster record to `status` if a previous attempt created it.
async fn reset_sub_cluster(
    federations: &dyn FederationStore,
    fed_cluster_id: &str,
    sub_cluster_id: &str,
    status: ClusterStatus,
) -> Result<(), CoreError> {
    match federations.get_sub_cluster(fed_cluster_id, sub_cluster_id).await {
        Ok(_) => {
            federations
                .update_sub_cluster_status(fed_cluster_id, sub_cluster_id, status)
                .await?;
            info!(%fed_cluster_id, %sub_cluster_id, %status, "sub cluster status reset before retry");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(%fed_cluster_id, %sub_cluster_id, "no sub cluster record; nothing to reset");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub struct BeforeRetryRegisterSubCluster {
    federations: Arc<dyn FederationStore>,
}

impl BeforeRetryRegisterSubCluster {
    pub fn new(federations: Arc<dyn FederationStore>) -> Self {
        Self { federations }
    }
}

#[async_trait]
impl RetryHook for BeforeRetryRegisterSubCluster {
    async fn before_retry(&self, task: &Task) -> Result<(), CoreError> {
        let params = RegisterSubClusterParams::from_task(task)?;
        reset_sub_cluster(
            self.federations.as_ref(),
            &params.fed_cluster_id,
            &params.sub_cluster_id,
            ClusterStatus::Creating,
        )
        .await
    }
}

pub struct BeforeRetryRemoveSubCluster {
    federations: Arc<dyn FederationStore>,
}

impl BeforeRetryRemoveSubCluster {
    pub fn new(federations: Arc<dyn FederationStore>) -> Self {
        Self { federations }
    }
}

#[async_trait]
impl RetryHook for BeforeRetryRemoveSubCluster {
    async fn before_retry(&self, task: &Task) -> Result<(), CoreError> {
        let params = RemoveSubClusterParams::from_task(task)?;
        reset_sub_cluster(
            self.federations.as_ref(),
            &params.fed_cluster_id,
            &params.sub_cluster_id,
            ClusterStatus::Deleting,
        )
        .await
    }
}
