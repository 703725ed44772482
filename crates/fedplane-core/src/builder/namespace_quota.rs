use std::collections::BTreeMap;

use async_trait::async_trait;
use fedplane_model::{Params, Step, SubClusterFlavor, Task};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{
    Assembly, BuildContext, HANDLE_NAMESPACE_QUOTA, TaskBuilder, WorkflowParams, keys, require,
    required_param,
};
use crate::error::CoreError;

pub const VALIDATE_STEP: &str = "validateNamespaceQuota";
pub const UPDATE_STATUS_STEP: &str = "updateFederationNamespaceStatus";
pub const CALLBACK: &str = "handleNamespaceQuotaCallback";

/// Payload key of the host-side aggregated quota.
pub const CLUSTER_QUOTA_KEY: &str = "cluster-quota";

/// One entry of a namespace-quota request: a sub-cluster flavor or the host cluster quota.
///
/// The derived order is the step order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuotaTarget {
    Flavor(SubClusterFlavor),
    ClusterQuota,
}

impl QuotaTarget {
    pub const ALL: [QuotaTarget; 5] = [
        QuotaTarget::Flavor(SubClusterFlavor::Normal),
        QuotaTarget::Flavor(SubClusterFlavor::Taiji),
        QuotaTarget::Flavor(SubClusterFlavor::Suanli),
        QuotaTarget::Flavor(SubClusterFlavor::Hunbu),
        QuotaTarget::ClusterQuota,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            QuotaTarget::Flavor(flavor) => flavor.as_str(),
            QuotaTarget::ClusterQuota => CLUSTER_QUOTA_KEY,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == key)
    }

    pub fn step_name(&self) -> &'static str {
        match self {
            QuotaTarget::Flavor(SubClusterFlavor::Normal) => "handleNormalNamespaceQuota",
            QuotaTarget::Flavor(SubClusterFlavor::Taiji) => "handleTaijiNamespaceQuota",
            QuotaTarget::Flavor(SubClusterFlavor::Suanli) => "handleSuanliNamespaceQuota",
            QuotaTarget::Flavor(SubClusterFlavor::Hunbu) => "handleHunbuNamespaceQuota",
            QuotaTarget::ClusterQuota => "createClusterQuota",
        }
    }

    /// Inverse of [`QuotaTarget::step_name`].
    pub fn from_step_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.step_name() == name)
    }
}

/// Desired namespace metadata and quota limits for one target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRequest {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Hard limits keyed by resource name, e.g. `requests.cpu`.
    #[serde(default)]
    pub hard: BTreeMap<String, String>,
}

impl QuotaRequest {
    /// Decode the `request` parameter of a quota step.
    pub fn from_step(step: &Step) -> Result<Self, CoreError> {
        let raw = step
            .params
            .get(keys::REQUEST)
            .ok_or_else(|| CoreError::missing(keys::REQUEST))?;
        Ok(serde_json::from_str(raw)?)
    }
}

/// Creates or converges a federated namespace and its quotas.
///
/// The step sequence follows the payload: one step per present target between validation and the status update.
#[derive(Debug, Clone, Default)]
pub struct HandleNamespaceQuota {
    pub fed_cluster_id: String,
    pub namespace: String,
    /// JSON object keyed by target (`normal`, `taiji`, `suanli`, `hunbu`, `cluster-quota`).
    pub payload: String,
    /// Restricts flavor steps to one sub-cluster.
    pub sub_cluster_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamespaceQuotaParams {
    pub fed_cluster_id: String,
    pub host_cluster_id: String,
    pub namespace: String,
    pub sub_cluster_id: Option<String>,
}

impl WorkflowParams for NamespaceQuotaParams {
    fn encode(&self) -> Params {
        let mut params = Params::from([
            (keys::FED_CLUSTER_ID.to_string(), self.fed_cluster_id.clone()),
            (keys::HOST_CLUSTER_ID.to_string(), self.host_cluster_id.clone()),
            (keys::NAMESPACE.to_string(), self.namespace.clone()),
        ]);
        if let Some(sub) = &self.sub_cluster_id {
            params.insert(keys::SUB_CLUSTER_ID.to_string(), sub.clone());
        }
        params
    }

    fn decode(params: &Params) -> Result<Self, CoreError> {
        Ok(Self {
            fed_cluster_id: required_param(params, keys::FED_CLUSTER_ID)?,
            host_cluster_id: required_param(params, keys::HOST_CLUSTER_ID)?,
            namespace: required_param(params, keys::NAMESPACE)?,
            sub_cluster_id: params
                .get(keys::SUB_CLUSTER_ID)
                .filter(|v| !v.trim().is_empty())
                .cloned(),
        })
    }
}

impl HandleNamespaceQuota {
    pub fn new(
        fed_cluster_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            fed_cluster_id: fed_cluster_id.into(),
            namespace: namespace.into(),
            payload: payload.into(),
            sub_cluster_id: None,
        }
    }

    /// Build from typed targets instead of a serialized payload.
    pub fn from_targets(
        fed_cluster_id: impl Into<String>,
        namespace: impl Into<String>,
        targets: &BTreeMap<QuotaTarget, QuotaRequest>,
    ) -> Result<Self, CoreError> {
        let payload: BTreeMap<&str, &QuotaRequest> =
            targets.iter().map(|(t, r)| (t.key(), r)).collect();
        Ok(Self::new(
            fed_cluster_id,
            namespace,
            serde_json::to_string(&payload)?,
        ))
    }

    pub fn with_sub_cluster(mut self, sub_cluster_id: impl Into<String>) -> Self {
        self.sub_cluster_id = Some(sub_cluster_id.into());
        self
    }

    /// Decode the payload into targets in step order.
    pub fn targets(&self) -> Result<BTreeMap<QuotaTarget, QuotaRequest>, CoreError> {
        let raw: BTreeMap<String, QuotaRequest> = serde_json::from_str(&self.payload)
            .map_err(|e| CoreError::Validation(format!("invalid namespace quota payload: {e}")))?;

        let mut targets = BTreeMap::new();
        for (key, request) in raw {
            let target = QuotaTarget::from_key(&key).ok_or_else(|| {
                CoreError::Validation(format!("unknown namespace quota target {key:?}"))
            })?;
            targets.insert(target, request);
        }
        if targets.is_empty() {
            return Err(CoreError::Validation(
                "namespace quota payload has no targets".into(),
            ));
        }
        Ok(targets)
    }

    fn task_index(&self) -> String {
        match &self.sub_cluster_id {
            Some(sub) => format!("{}/{}/{sub}", self.fed_cluster_id, self.namespace),
            None => format!("{}/{}", self.fed_cluster_id, self.namespace),
        }
    }
}

#[async_trait]
impl TaskBuilder for HandleNamespaceQuota {
    fn task_type(&self) -> &'static str {
        HANDLE_NAMESPACE_QUOTA
    }

    fn steps(&self) -> Vec<Step> {
        let namespace = self.namespace.as_str();
        let mut steps = vec![
            Step::new(VALIDATE_STEP, "validate namespace quota")
                .with_param(keys::NAMESPACE, namespace),
        ];
        for (target, request) in self.targets().unwrap_or_default() {
            let mut step = Step::new(target.step_name(), format!("handle {} quota", target.key()))
                .with_param(keys::NAMESPACE, namespace)
                .with_param(
                    keys::REQUEST,
                    serde_json::to_string(&request).unwrap_or_default(),
                );
            if let QuotaTarget::Flavor(flavor) = target {
                step = step.with_param(keys::FLAVOR, flavor.as_str());
            }
            steps.push(step);
        }
        steps.push(
            Step::new(UPDATE_STATUS_STEP, "update federation namespace status")
                .with_param(keys::NAMESPACE, namespace),
        );
        steps
    }

    #[instrument(level = "debug", skip(self, ctx), fields(fed_cluster_id = %self.fed_cluster_id, namespace = %self.namespace))]
    async fn build_task(&self, ctx: &BuildContext, creator: &str) -> Result<Task, CoreError> {
        let fed_cluster_id = require(keys::FED_CLUSTER_ID, &self.fed_cluster_id)?;
        let namespace = require(keys::NAMESPACE, &self.namespace)?;
        self.targets()?;

        let fed = ctx.federations.get_federation_cluster(fed_cluster_id).await?;
        if let Some(sub) = &self.sub_cluster_id {
            ctx.federations.get_sub_cluster(fed_cluster_id, sub).await?;
        }

        let params = NamespaceQuotaParams {
            fed_cluster_id: fed_cluster_id.to_string(),
            host_cluster_id: fed.host_cluster_id,
            namespace: namespace.to_string(),
            sub_cluster_id: self.sub_cluster_id.clone(),
        };
        Assembly {
            task_type: HANDLE_NAMESPACE_QUOTA,
            task_name: format!("handle namespace {namespace} quota"),
            task_index: self.task_index(),
            creator,
            call_back: CALLBACK,
            params: params.encode(),
        }
        .into_task(self.steps())
    }
}
