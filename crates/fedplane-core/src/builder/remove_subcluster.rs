use async_trait::async_trait;
use fedplane_model::{Params, Step, Task};
use tracing::instrument;

use super::{
    Assembly, BuildContext, REMOVE_SUB_CLUSTER, TaskBuilder, WorkflowParams, keys, require,
    register_subcluster::pair_index, required_param,
};
use crate::error::CoreError;

pub const CALLBACK: &str = "removeSubClusterCallback";

/// Detaches a sub-cluster from its federation.
#[derive(Debug, Clone, Default)]
pub struct RemoveSubCluster {
    pub fed_cluster_id: String,
    pub sub_cluster_id: String,
    pub user_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoveSubClusterParams {
    pub fed_cluster_id: String,
    pub host_cluster_id: String,
    pub sub_cluster_id: String,
    pub user_token: String,
}

impl WorkflowParams for RemoveSubClusterParams {
    fn encode(&self) -> Params {
        Params::from([
            (keys::FED_CLUSTER_ID.to_string(), self.fed_cluster_id.clone()),
            (keys::HOST_CLUSTER_ID.to_string(), self.host_cluster_id.clone()),
            (keys::SUB_CLUSTER_ID.to_string(), self.sub_cluster_id.clone()),
            (keys::USER_TOKEN.to_string(), self.user_token.clone()),
        ])
    }

    fn decode(params: &Params) -> Result<Self, CoreError> {
        Ok(Self {
            fed_cluster_id: required_param(params, keys::FED_CLUSTER_ID)?,
            host_cluster_id: required_param(params, keys::HOST_CLUSTER_ID)?,
            sub_cluster_id: required_param(params, keys::SUB_CLUSTER_ID)?,
            user_token: required_param(params, keys::USER_TOKEN)?,
        })
    }
}

impl RemoveSubCluster {
    pub fn new(
        fed_cluster_id: impl Into<String>,
        sub_cluster_id: impl Into<String>,
        user_token: impl Into<String>,
    ) -> Self {
        Self {
            fed_cluster_id: fed_cluster_id.into(),
            sub_cluster_id: sub_cluster_id.into(),
            user_token: user_token.into(),
        }
    }
}

#[async_trait]
impl TaskBuilder for RemoveSubCluster {
    fn task_type(&self) -> &'static str {
        REMOVE_SUB_CLUSTER
    }

    fn steps(&self) -> Vec<Step> {
        let sub = self.sub_cluster_id.as_str();
        let fed = self.fed_cluster_id.as_str();
        vec![
            Step::new("checkSubClusterRemovable", "check sub cluster removable")
                .with_param(keys::FED_CLUSTER_ID, fed)
                .with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("uninstallClusternetAgent", "uninstall clusternet agent")
                .with_param(keys::SUB_CLUSTER_ID, sub)
                .with_skip_on_failed(true),
            Step::new("deleteManagedCluster", "delete managed cluster")
                .with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("deleteSubClusterRecord", "delete sub cluster record")
                .with_param(keys::FED_CLUSTER_ID, fed)
                .with_param(keys::SUB_CLUSTER_ID, sub),
            Step::new("updateFederationStatus", "update federation status")
                .with_param(keys::FED_CLUSTER_ID, fed),
        ]
    }

    #[instrument(level = "debug", skip(self, ctx), fields(fed_cluster_id = %self.fed_cluster_id, sub_cluster_id = %self.sub_cluster_id))]
    async fn build_task(&self, ctx: &BuildContext, creator: &str) -> Result<Task, CoreError> {
        let fed_cluster_id = require(keys::FED_CLUSTER_ID, &self.fed_cluster_id)?;
        let sub_cluster_id = require(keys::SUB_CLUSTER_ID, &self.sub_cluster_id)?;
        let user_token = require(keys::USER_TOKEN, &self.user_token)?;

        let fed = ctx.federations.get_federation_cluster(fed_cluster_id).await?;
        // Only registered members can be removed.
        ctx.federations
            .get_sub_cluster(fed_cluster_id, sub_cluster_id)
            .await?;

        let params = RemoveSubClusterParams {
            fed_cluster_id: fed_cluster_id.to_string(),
            host_cluster_id: fed.host_cluster_id,
            sub_cluster_id: sub_cluster_id.to_string(),
            user_token: user_token.to_string(),
        };
        Assembly {
            task_type: REMOVE_SUB_CLUSTER,
            task_name: format!("remove {sub_cluster_id} from {fed_cluster_id}"),
            task_index: pair_index(fed_cluster_id, sub_cluster_id),
            creator,
            call_back: CALLBACK,
            params: params.encode(),
        }
        .into_task(self.steps())
    }
}
