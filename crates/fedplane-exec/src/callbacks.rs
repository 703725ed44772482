//! Completion callbacks of the cluster workflows.
//!
//! Successful runs already leave the records in `running`/`deleted` (or the namespace in `success`)
//! through their last steps; the callbacks only record failures.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use fedplane_core::{
    ClusterInventory, CoreError, FederationStore, WorkflowParams,
    builder::{
        HANDLE_NAMESPACE_QUOTA_CALLBACK, INSTALL_FEDERATION_CALLBACK, InstallFederationParams,
        NamespaceQuotaParams, REGISTER_SUB_CLUSTER_CALLBACK, REMOVE_SUB_CLUSTER_CALLBACK,
        RegisterSubClusterParams, RemoveSubClusterParams,
    },
};
use fedplane_model::{ClusterStatus, Task, TaskStatus, annotations};
use tracing::{debug, warn};

use crate::{
    error::ExecResult,
    registry::{CallbackRegistry, TaskCallback},
};

fn ignore_missing(res: Result<(), CoreError>) -> ExecResult<()> {
    match res {
        Err(e) if e.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}

pub struct InstallFederationCallback {
    federations: Arc<dyn FederationStore>,
}

#[async_trait]
impl TaskCallback for InstallFederationCallback {
    async fn call(&self, task: &Task) -> ExecResult<()> {
        if task.status == TaskStatus::Success {
            return Ok(());
        }
        let params = InstallFederationParams::from_task(task)?;
        let Some(fed) = self
            .federations
            .find_federation_by_host(&params.cluster_id)
            .await?
        else {
            debug!(cluster_id = %params.cluster_id, "install ended before a federation was recorded");
            return Ok(());
        };
        warn!(fed_cluster_id = %fed.fed_cluster_id, status = %task.status, "federation install did not succeed");
        ignore_missing(
            self.federations
                .update_federation_status(&fed.fed_cluster_id, ClusterStatus::Failed)
                .await,
        )
    }
}

/// Shared by register and remove: a sub-cluster left mid-way is marked failed.
pub struct SubClusterCallback {
    federations: Arc<dyn FederationStore>,
    remove: bool,
}

#[async_trait]
impl TaskCallback for SubClusterCallback {
    async fn call(&self, task: &Task) -> ExecResult<()> {
        if task.status == TaskStatus::Success {
            return Ok(());
        }
        let (fed, sub) = if self.remove {
            let p = RemoveSubClusterParams::from_task(task)?;
            (p.fed_cluster_id, p.sub_cluster_id)
        } else {
            let p = RegisterSubClusterParams::from_task(task)?;
            (p.fed_cluster_id, p.sub_cluster_id)
        };
        warn!(fed_cluster_id = %fed, sub_cluster_id = %sub, status = %task.status, "sub cluster workflow did not succeed");
        ignore_missing(
            self.federations
                .update_sub_cluster_status(&fed, &sub, ClusterStatus::Failed)
                .await,
        )
    }
}

/// Marks the host namespace `failed` when its quota workflow did not succeed.
pub struct NamespaceQuotaCallback {
    inventory: Arc<dyn ClusterInventory>,
}

#[async_trait]
impl TaskCallback for NamespaceQuotaCallback {
    async fn call(&self, task: &Task) -> ExecResult<()> {
        if task.status == TaskStatus::Success {
            return Ok(());
        }
        let params = NamespaceQuotaParams::from_task(task)?;
        warn!(
            host_cluster_id = %params.host_cluster_id,
            namespace = %params.namespace,
            status = %task.status,
            "namespace quota workflow did not succeed"
        );
        let patch = BTreeMap::from([(
            annotations::NAMESPACE_STATUS.to_string(),
            annotations::NAMESPACE_STATUS_FAILED.to_string(),
        )]);
        let found = self
            .inventory
            .patch_namespace_annotations(&params.host_cluster_id, &params.namespace, &patch)
            .await?;
        if !found {
            debug!(namespace = %params.namespace, "host namespace is gone; nothing to mark");
        }
        Ok(())
    }
}

/// Register the workflow callbacks under the names the builders stamp on their tasks.
pub fn register_builtin_callbacks(
    registry: &CallbackRegistry,
    federations: Arc<dyn FederationStore>,
    inventory: Arc<dyn ClusterInventory>,
) {
    registry
        .register(
            HANDLE_NAMESPACE_QUOTA_CALLBACK,
            Arc::new(NamespaceQuotaCallback { inventory }),
        )
        .register(
            INSTALL_FEDERATION_CALLBACK,
            Arc::new(InstallFederationCallback {
                federations: federations.clone(),
            }),
        )
        .register(
            REGISTER_SUB_CLUSTER_CALLBACK,
            Arc::new(SubClusterCallback {
                federations: federations.clone(),
                remove: false,
            }),
        )
        .register(
            REMOVE_SUB_CLUSTER_CALLBACK,
            Arc::new(SubClusterCallback {
                federations,
                remove: true,
            }),
        );
}
