//! Task builders, one per workflow kind.
//!
//! A builder validates its inputs, resolves cross references through the collaborators in [`BuildContext`] and emits a [`Task`] whose `CommonParams` already carry the resolved identifiers.
//! Each workflow decodes its `CommonParams` into a typed parameter struct through [`WorkflowParams`].

mod hooks;
pub use hooks::{
    BeforeRetryInstallFederation, BeforeRetryRegisterSubCluster, BeforeRetryRemoveSubCluster,
};

mod install_federation;
pub use install_federation::{
    CALLBACK as INSTALL_FEDERATION_CALLBACK, InstallFederation, InstallFederationParams,
};

mod namespace_quota;
pub use namespace_quota::{
    CALLBACK as HANDLE_NAMESPACE_QUOTA_CALLBACK, HandleNamespaceQuota, NamespaceQuotaParams, QuotaRequest, QuotaTarget, UPDATE_STATUS_STEP,
    VALIDATE_STEP,
};

mod register_subcluster;
pub use register_subcluster::{
    CALLBACK as REGISTER_SUB_CLUSTER_CALLBACK, RegisterSubCluster, RegisterSubClusterParams,
};

mod remove_subcluster;
pub use remove_subcluster::{
    CALLBACK as REMOVE_SUB_CLUSTER_CALLBACK, RemoveSubCluster, RemoveSubClusterParams,
};

use std::sync::Arc;

use async_trait::async_trait;
use fedplane_model::{Params, Step, Task};

use crate::{
    error::CoreError,
    inventory::{ClusterInventory, FederationStore, ProjectService},
};

pub const INSTALL_FEDERATION: &str = "InstallFederation";
pub const REGISTER_SUB_CLUSTER: &str = "RegisterSubCluster";
pub const REMOVE_SUB_CLUSTER: &str = "RemoveSubCluster";
pub const HANDLE_NAMESPACE_QUOTA: &str = "HandleNamespaceQuota";

/// Common parameter keys shared by several workflows.
pub mod keys {
    pub const PROJECT_ID: &str = "projectId";
    pub const PROJECT_CODE: &str = "projectCode";
    pub const CLUSTER_ID: &str = "clusterId";
    pub const CLUSTER_NAME: &str = "clusterName";
    pub const USER_TOKEN: &str = "userToken";
    pub const FED_CLUSTER_ID: &str = "fedClusterId";
    pub const HOST_CLUSTER_ID: &str = "hostClusterId";
    pub const SUB_CLUSTER_ID: &str = "subClusterId";
    pub const FLAVOR: &str = "flavor";
    pub const NAMESPACE: &str = "namespace";
    pub const REQUEST: &str = "request";
}

/// Collaborators a builder may consult while resolving its inputs.
#[derive(Clone)]
pub struct BuildContext {
    pub federations: Arc<dyn FederationStore>,
    pub inventory: Arc<dyn ClusterInventory>,
    pub projects: Arc<dyn ProjectService>,
}

impl BuildContext {
    pub fn new(
        federations: Arc<dyn FederationStore>,
        inventory: Arc<dyn ClusterInventory>,
        projects: Arc<dyn ProjectService>,
    ) -> Self {
        Self {
            federations,
            inventory,
            projects,
        }
    }
}

#[async_trait]
pub trait TaskBuilder: Send + Sync {
    fn task_type(&self) -> &'static str;

    /// The ordered steps of this workflow with their bound inputs. Never empty.
    fn steps(&self) -> Vec<Step>;

    /// Validate, resolve and assemble a ready-to-dispatch task.
    async fn build_task(&self, ctx: &BuildContext, creator: &str) -> Result<Task, CoreError>;
}

/// Typed view over a workflow's `CommonParams`.
pub trait WorkflowParams: Sized {
    fn encode(&self) -> Params;

    fn decode(params: &Params) -> Result<Self, CoreError>;

    fn from_task(task: &Task) -> Result<Self, CoreError> {
        Self::decode(&task.common_params)
    }
}

/// Fail with a validation error naming `field` when `value` is blank.
pub(crate) fn require<'a>(field: &str, value: &'a str) -> Result<&'a str, CoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::missing(field));
    }
    Ok(value)
}

/// Read a required non-empty parameter.
pub(crate) fn required_param(params: &Params, key: &str) -> Result<String, CoreError> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::missing(key))
}

pub(crate) fn optional_param(params: &Params, key: &str) -> String {
    params.get(key).cloned().unwrap_or_default()
}

/// Everything a builder decides besides its steps.
pub(crate) struct Assembly<'a> {
    pub task_type: &'static str,
    pub task_name: String,
    pub task_index: String,
    pub creator: &'a str,
    pub call_back: &'a str,
    pub params: Params,
}

impl Assembly<'_> {
    pub fn into_task(self, steps: Vec<Step>) -> Result<Task, CoreError> {
        let mut task = Task::new(self.task_type, self.task_name);
        task.task_index = self.task_index;
        task.creator = self.creator.to_string();
        task.updater = self.creator.to_string();
        task.call_back_func_name = self.call_back.to_string();
        task.common_params = self.params;
        for step in steps {
            task.push_step(step);
        }
        task.check_invariants().map_err(CoreError::Validation)?;
        Ok(task)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use fedplane_model::{Cluster, ClusterStatus, FederationCluster, Project, SubCluster};

    use super::*;
    use crate::inventory::{MemoryClusterInventory, MemoryFederationStore, StaticProjectService};

    pub struct Fixture {
        pub ctx: BuildContext,
        pub federations: MemoryFederationStore,
        pub inventory: MemoryClusterInventory,
    }

    /// Host `c1` in project `p1`, federation `F1` on `c1`, member `S1` and an unregistered cluster `S2`.
    pub fn fixture() -> Fixture {
        let federations = MemoryFederationStore::new();
        let inventory = MemoryClusterInventory::new();
        let projects = StaticProjectService::new();

        projects
            .insert(Project {
                project_id: "p1".into(),
                project_code: "demo".into(),
            })
            .unwrap();
        for id in ["c1", "S1", "S2"] {
            inventory
                .upsert_cluster(Cluster {
                    cluster_id: id.into(),
                    cluster_name: format!("cluster-{id}"),
                    project_id: "p1".into(),
                    status: ClusterStatus::Running,
                })
                .unwrap();
        }
        federations
            .upsert_federation(FederationCluster {
                fed_cluster_id: "F1".into(),
                host_cluster_id: "c1".into(),
                project_id: "p1".into(),
                status: ClusterStatus::Running,
                ..Default::default()
            })
            .unwrap();
        federations
            .upsert_sub_cluster(SubCluster {
                fed_cluster_id: "F1".into(),
                sub_cluster_id: "S1".into(),
                host_cluster_id: "c1".into(),
                project_id: "p1".into(),
                status: ClusterStatus::Running,
            })
            .unwrap();

        let ctx = BuildContext::new(
            Arc::new(federations.clone()),
            Arc::new(inventory.clone()),
            Arc::new(projects),
        );
        Fixture {
            ctx,
            federations,
            inventory,
        }
    }
}
