use async_trait::async_trait;
use fedplane_model::{Params, Step, SubClusterFlavor, Task};
use tracing::instrument;

use super::{
    Assembly, BuildContext, REGISTER_SUB_CLUSTER, TaskBuilder, WorkflowParams, keys,
    optional_param, require, required_param,
};
use crate::error::CoreError;

pub const CALLBACK: &str = "registerSubClusterCallback";

/// Joins a cluster to a federation as a sub-cluster of the given flavor.
#[derive(Debug, Clone, Default)]
pub struct RegisterSubCluster {
    pub fed_cluster_id: String,
    pub sub_cluster_id: String,
    pub user_token: String,
    pub flavor: SubClusterFlavor,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterSubClusterParams {
    pub fed_cluster_id: String,
    pub host_cluster_id: String,
    pub sub_cluster_id: String,
    pub project_id: String,
    pub project_code: String,
    pub user_token: String,
    pub flavor: SubClusterFlavor,
}

impl WorkflowParams for RegisterSubClusterParams {
    fn encode(&self) -> Params {
        Params::from([
            (keys::FED_CLUSTER_ID.to_string(), self.fed_cluster_id.clone()),
            (keys::HOST_CLUSTER_ID.to_string(), self.host_cluster_id.clone()),
            (keys::SUB_CLUSTER_ID.to_string(), self.sub_cluster_id.clone()),
            (keys::PROJECT_ID.to_string(), self.project_id.clone()),
            (keys::PROJECT_CODE.to_string(), self.project_code.clone()),
            (keys::USER_TOKEN.to_string(), self.user_token.clone()),
            (keys::FLAVOR.to_string(), self.flavor.as_str().to_string()),
        ])
    }

    fn decode(params: &Params) -> Result<Self, CoreError> {
        let flavor = match params.get(keys::FLAVOR).map(|v| v.trim()) {
            None | Some("") => SubClusterFlavor::Normal,
            Some(raw) => raw.parse()?,
        };
        Ok(Self {
            fed_cluster_id: required_param(params, keys::FED_CLUSTER_ID)?,
            host_cluster_id: required_param(params, keys::HOST_CLUSTER_ID)?,
            sub_cluster_id: required_param(params, keys::SUB_CLUSTER_ID)?,
            project_id: optional_param(params, keys::PROJECT_ID),
            project_code: optional_param(params, keys::PROJECT_CODE),
            user_token: required_param(params, keys::USER_TOKEN)?,
            flavor,
        })
    }
}

impl RegisterSubCluster {
    pub fn new(
        fed_cluster_id: impl Into<String>,
        sub_cluster_id: impl Into<String>,
        user_token: impl Into<String>,
    ) -> Self {
        Self {
            fed_cluster_id: fed_cluster_id.into(),
            sub_cluster_id: sub_cluster_id.into(),
            user_token: user_token.into(),
            flavor: SubClusterFlavor::Normal,
        }
    }

    pub fn with_flavor(mut self, flavor: SubClusterFlavor) -> Self {
        self.flavor = flavor;
        self
    }
}

/// `fed/sub`, the correlation key of sub-cluster membership tasks.
pub(crate) fn pair_index(fed_cluster_id: &str, sub_cluster_id: &str) -> String {
    format!("{fed_cluster_id}/{sub_cluster_id}")
}

#[async_trait]
impl TaskBuilder for RegisterSubCluster {
    fn task_type(&self) -> &'static str {
        REGISTER_SUB_CLUSTER
    }

    fn steps(&self) -> Vec<Step> {
        let sub = self.sub_cluster_id.as_str();
        let fed = self.fed_cluster_id.as_str();
        vec![
            Step::new("checkSubCluster", "check sub cluster").with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("installClusternetAgent", "install clusternet agent")
                .with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("registerManagedCluster", "register managed cluster")
                .with_param(keys::FED_CLUSTER_ID, fed)
                .with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("waitManagedClusterReady", "wait managed cluster ready")
                .with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("labelManagedCluster", "label managed cluster")
                .with_param(keys::SUB_CLUSTER_ID, sub)
                .with_param(keys::FLAVOR, self.flavor.as_str()),
            Step::new("createSubClusterRecord", "create sub cluster record")
                .with_param(keys::FED_CLUSTER_ID, fed)
                .with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("updateSubClusterStatus", "update sub cluster status")
                .with_param(keys::FED_CLUSTER_ID, fed)
                .with_param(keys::SUB_CLUSTER_ID, sub),
        ]
    }

    #[instrument(level = "debug", skip(self, ctx), fields(fed_cluster_id = %self.fed_cluster_id, sub_cluster_id = %self.sub_cluster_id))]
    async fn build_task(&self, ctx: &BuildContext, creator: &str) -> Result<Task, CoreError> {
        let fed_cluster_id = require(keys::FED_CLUSTER_ID, &self.fed_cluster_id)?;
        let sub_cluster_id = require(keys::SUB_CLUSTER_ID, &self.sub_cluster_id)?;
        let user_token = require(keys::USER_TOKEN, &self.user_token)?;

        let fed = ctx.federations.get_federation_cluster(fed_cluster_id).await?;
        if fed.is_deleted() {
            return Err(CoreError::not_found("federation cluster", fed_cluster_id));
        }
        let sub = ctx.inventory.get_cluster(sub_cluster_id).await?;
        let project = ctx.projects.get_project(&sub.project_id).await?;

        let params = RegisterSubClusterParams {
            fed_cluster_id: fed_cluster_id.to_string(),
            host_cluster_id: fed.host_cluster_id,
            sub_cluster_id: sub_cluster_id.to_string(),
            project_id: project.project_id,
            project_code: project.project_code,
            user_token: user_token.to_string(),
            flavor: self.flavor,
        };
        Assembly {
            task_type: REGISTER_SUB_CLUSTER,
            task_name: format!("register {sub_cluster_id} to {fed_cluster_id}"),
            task_index: pair_index(fed_cluster_id, sub_cluster_id),
            creator,
            call_back: CALLBACK,
            params: params.encode(),
        }
        .into_task(self.steps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::testutil::fixture;

    #[tokio::test]
    async fn resolves_host_and_project() {
        let fx = fixture();
        let task = RegisterSubCluster::new("F1", "S2", "t1")
            .with_flavor(SubClusterFlavor::Taiji)
            .build_task(&fx.ctx, "admin")
            .await
            .unwrap();

        assert_eq!(task.task_index, "F1/S2");
        assert_eq!(task.step_sequence.len(), 7);
        let params = RegisterSubClusterParams::from_task(&task).unwrap();
        assert_eq!(params.host_cluster_id, "c1");
        assert_eq!(params.project_code, "demo");
        assert_eq!(params.flavor, SubClusterFlavor::Taiji);
        assert_eq!(
            task.step("labelManagedCluster").unwrap().params["flavor"],
            "taiji"
        );
    }

    #[tokio::test]
    async fn unknown_federation_is_not_found() {
        let fx = fixture();
        let err = RegisterSubCluster::new("F9", "S2", "t1")
            .build_task(&fx.ctx, "admin")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn missing_sub_cluster_id_names_the_field() {
        let fx = fixture();
        let err = RegisterSubCluster::new("F1", " ", "t1")
            .build_task(&fx.ctx, "admin")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "validation failed: subClusterId is required");
    }

    #[test]
    fn decode_rejects_unknown_flavor() {
        let mut params = RegisterSubClusterParams {
            fed_cluster_id: "F1".into(),
            host_cluster_id: "c1".into(),
            sub_cluster_id: "S1".into(),
            user_token: "t".into(),
            ..Default::default()
        }
        .encode();
        params.insert("flavor".into(), "edge".into());
        assert!(RegisterSubClusterParams::decode(&params).is_err());
    }
}
