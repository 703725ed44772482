use async_trait::async_trait;
use fedplane_model::{Params, Step, Task};
use tracing::{debug, instrument};

use super::{
    Assembly, BuildContext, INSTALL_FEDERATION, TaskBuilder, WorkflowParams, keys,
    optional_param, require, required_param,
};
use crate::error::CoreError;

pub const CALLBACK: &str = "installFederationCallback";

/// Installs the federation control components on a host cluster.
#[derive(Debug, Clone, Default)]
pub struct InstallFederation {
    pub project_id: String,
    pub cluster_id: String,
    pub user_token: String,
}

/// Resolved `CommonParams` of an install-federation task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallFederationParams {
    pub project_id: String,
    pub project_code: String,
    pub cluster_id: String,
    pub cluster_name: String,
    pub user_token: String,
}

impl WorkflowParams for InstallFederationParams {
    fn encode(&self) -> Params {
        Params::from([
            (keys::PROJECT_ID.to_string(), self.project_id.clone()),
            (keys::PROJECT_CODE.to_string(), self.project_code.clone()),
            (keys::CLUSTER_ID.to_string(), self.cluster_id.clone()),
            (keys::CLUSTER_NAME.to_string(), self.cluster_name.clone()),
            (keys::USER_TOKEN.to_string(), self.user_token.clone()),
        ])
    }

    fn decode(params: &Params) -> Result<Self, CoreError> {
        Ok(Self {
            project_id: required_param(params, keys::PROJECT_ID)?,
            project_code: optional_param(params, keys::PROJECT_CODE),
            cluster_id: required_param(params, keys::CLUSTER_ID)?,
            cluster_name: optional_param(params, keys::CLUSTER_NAME),
            user_token: required_param(params, keys::USER_TOKEN)?,
        })
    }
}

impl InstallFederation {
    pub fn new(
        project_id: impl Into<String>,
        cluster_id: impl Into<String>,
        user_token: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cluster_id: cluster_id.into(),
            user_token: user_token.into(),
        }
    }
}

#[async_trait]
impl TaskBuilder for InstallFederation {
    fn task_type(&self) -> &'static str {
        INSTALL_FEDERATION
    }

    fn steps(&self) -> Vec<Step> {
        let cluster = self.cluster_id.as_str();
        vec![
            Step::new("checkHostCluster", "check host cluster").with_param(keys::CLUSTER_ID, cluster),
            Step::new("createFederationNamespace", "create federation namespace")
                .with_param(keys::CLUSTER_ID, cluster),
            Step::new("installClusternetHub", "install clusternet hub")
                .with_param(keys::CLUSTER_ID, cluster),
            Step::new("installClusternetScheduler", "install clusternet scheduler")
                .with_param(keys::CLUSTER_ID, cluster),
            Step::new("installClusternetController", "install clusternet controller")
                .with_param(keys::CLUSTER_ID, cluster),
            Step::new("installFederationApiserver", "install federation apiserver")
                .with_param(keys::CLUSTER_ID, cluster),
            Step::new("registerFederationCluster", "register federation cluster")
                .with_param(keys::CLUSTER_ID, cluster)
                .with_param(keys::PROJECT_ID, self.project_id.as_str()),
            Step::new("updateFederationStatus", "update federation status")
                .with_param(keys::CLUSTER_ID, cluster),
        ]
    }

    #[instrument(level = "debug", skip(self, ctx), fields(cluster_id = %self.cluster_id))]
    async fn build_task(&self, ctx: &BuildContext, creator: &str) -> Result<Task, CoreError> {
        let project_id = require(keys::PROJECT_ID, &self.project_id)?;
        let cluster_id = require(keys::CLUSTER_ID, &self.cluster_id)?;
        let user_token = require(keys::USER_TOKEN, &self.user_token)?;

        let host = ctx.inventory.get_cluster(cluster_id).await?;
        let project = ctx.projects.get_project(project_id).await?;
        debug!(project_code = %project.project_code, "resolved host cluster and project");

        let params = InstallFederationParams {
            project_id: project_id.to_string(),
            project_code: project.project_code,
            cluster_id: cluster_id.to_string(),
            cluster_name: host.cluster_name,
            user_token: user_token.to_string(),
        };
        Assembly {
            task_type: INSTALL_FEDERATION,
            task_name: format!("install federation on {cluster_id}"),
            task_index: cluster_id.to_string(),
            creator,
            call_back: CALLBACK,
            params: params.encode(),
        }
        .into_task(self.steps())
    }
}

#[cfg(test)]
mod tests {
    use fedplane_model::TaskStatus;

    use super::*;
    use crate::builder::testutil::fixture;

    #[tokio::test]
    async fn builds_eight_step_task_indexed_by_cluster() {
        let fx = fixture();
        let task = InstallFederation::new("p1", "c1", "t1")
            .build_task(&fx.ctx, "admin")
            .await
            .unwrap();

        assert_eq!(task.task_index, "c1");
        assert_eq!(task.task_type, INSTALL_FEDERATION);
        assert_eq!(task.step_sequence.len(), 8);
        assert_eq!(task.current_step, task.step_sequence[0]);
        assert_eq!(task.param("clusterId"), Some("c1"));
        assert_eq!(task.param("projectCode"), Some("demo"));
        assert_eq!(task.call_back_func_name, CALLBACK);
        assert_eq!(task.status, TaskStatus::Init);
        assert!(task.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn empty_user_token_is_rejected() {
        let fx = fixture();
        let err = InstallFederation::new("p1", "c1", "")
            .build_task(&fx.ctx, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("userToken"));
    }

    #[tokio::test]
    async fn unknown_host_cluster_is_not_found() {
        let fx = fixture();
        let err = InstallFederation::new("p1", "missing", "t1")
            .build_task(&fx.ctx, "admin")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn params_decode_back_into_typed_struct() {
        let fx = fixture();
        let task = InstallFederation::new("p1", "c1", "t1")
            .build_task(&fx.ctx, "admin")
            .await
            .unwrap();
        let params = InstallFederationParams::from_task(&task).unwrap();
        assert_eq!(params.cluster_name, "cluster-c1");
        assert_eq!(params.user_token, "t1");
    }
}
