use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use fedplane_core::{
    ClusterInventory, CoreError, FederationStore, WorkflowParams,
    builder::{NamespaceQuotaParams, QuotaRequest, QuotaTarget, keys},
};
use fedplane_model::{
    MANAGED_CLUSTER_TYPE_LABEL, Namespace, Params, ResourceQuota, SubClusterFlavor, annotations,
    timestamp::now_rfc3339,
};
use tracing::{debug, info, instrument};

use crate::{
    error::{ExecError, ExecResult},
    registry::{StepContext, StepHandler},
};

/// Downstream namespace and quota API of one sub-cluster flavor.
#[async_trait]
pub trait NamespaceQuotaApi: Send + Sync + 'static {
    /// Create the namespace or merge labels and annotations into the existing one.
    async fn ensure_namespace(&self, cluster_id: &str, ns: &Namespace) -> Result<(), CoreError>;

    async fn apply_quota(&self, cluster_id: &str, quota: &ResourceQuota) -> Result<(), CoreError>;
}

/// [`NamespaceQuotaApi`] that talks to the cluster inventory directly.
pub struct InventoryQuotaApi {
    inventory: Arc<dyn ClusterInventory>,
}

impl InventoryQuotaApi {
    pub fn new(inventory: Arc<dyn ClusterInventory>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl NamespaceQuotaApi for InventoryQuotaApi {
    async fn ensure_namespace(&self, cluster_id: &str, ns: &Namespace) -> Result<(), CoreError> {
        match self.inventory.get_namespace(cluster_id, &ns.name).await? {
            Some(mut existing) => {
                existing.labels.extend(ns.labels.clone());
                existing.annotations.extend(ns.annotations.clone());
                self.inventory.update_namespace(cluster_id, &existing).await
            }
            None => self.inventory.create_namespace(cluster_id, ns).await,
        }
    }

    async fn apply_quota(&self, cluster_id: &str, quota: &ResourceQuota) -> Result<(), CoreError> {
        self.inventory.apply_quota(cluster_id, quota).await
    }
}

/// One adapter per sub-cluster flavor.
#[derive(Clone)]
pub struct FlavorAdapters {
    normal: Arc<dyn NamespaceQuotaApi>,
    taiji: Arc<dyn NamespaceQuotaApi>,
    suanli: Arc<dyn NamespaceQuotaApi>,
    hunbu: Arc<dyn NamespaceQuotaApi>,
}

impl FlavorAdapters {
    /// The same adapter for every flavor.
    pub fn uniform(api: Arc<dyn NamespaceQuotaApi>) -> Self {
        Self {
            normal: Arc::clone(&api),
            taiji: Arc::clone(&api),
            suanli: Arc::clone(&api),
            hunbu: api,
        }
    }

    pub fn with(mut self, flavor: SubClusterFlavor, api: Arc<dyn NamespaceQuotaApi>) -> Self {
        match flavor {
            SubClusterFlavor::Normal => self.normal = api,
            SubClusterFlavor::Taiji => self.taiji = api,
            SubClusterFlavor::Suanli => self.suanli = api,
            SubClusterFlavor::Hunbu => self.hunbu = api,
        }
        self
    }

    pub fn get(&self, flavor: SubClusterFlavor) -> &Arc<dyn NamespaceQuotaApi> {
        match flavor {
            SubClusterFlavor::Normal => &self.normal,
            SubClusterFlavor::Taiji => &self.taiji,
            SubClusterFlavor::Suanli => &self.suanli,
            SubClusterFlavor::Hunbu => &self.hunbu,
        }
    }
}

/// Name of the quota object a flavor manages inside `namespace`.
pub fn quota_name(flavor: SubClusterFlavor, namespace: &str) -> String {
    match flavor {
        SubClusterFlavor::Normal => namespace.to_string(),
        SubClusterFlavor::Taiji => format!("{namespace}-taiji"),
        SubClusterFlavor::Suanli => format!("{namespace}-suanli"),
        SubClusterFlavor::Hunbu => format!("{namespace}-hunbu"),
    }
}

/// The namespace a sub-cluster of `flavor` should carry for the federated `host` namespace.
pub fn desired_namespace(
    flavor: SubClusterFlavor,
    host: &Namespace,
    request: &QuotaRequest,
) -> Namespace {
    let mut ns = Namespace::new(host.name.clone());
    ns.labels = request.labels.clone();
    ns.annotations = request.annotations.clone();
    match flavor {
        SubClusterFlavor::Normal => {}
        SubClusterFlavor::Taiji | SubClusterFlavor::Suanli | SubClusterFlavor::Hunbu => {
            ns.labels
                .insert(MANAGED_CLUSTER_TYPE_LABEL.to_string(), flavor.as_str().to_string());
        }
    }
    ns.annotations
        .insert(annotations::FEDERATED_FLAG.to_string(), "true".to_string());
    if let Some(ts) = host.annotation(annotations::LAST_UPDATE_TIMESTAMP) {
        ns.annotations
            .insert(annotations::LAST_UPDATE_TIMESTAMP.to_string(), ts.to_string());
    }
    ns
}

/// Collaborators shared by the namespace-quota step handlers.
pub struct NamespaceDeps {
    pub federations: Arc<dyn FederationStore>,
    pub inventory: Arc<dyn ClusterInventory>,
    pub adapters: FlavorAdapters,
}

impl NamespaceDeps {
    async fn host_namespace(&self, params: &NamespaceQuotaParams) -> ExecResult<Namespace> {
        self.inventory
            .get_namespace(&params.host_cluster_id, &params.namespace)
            .await?
            .ok_or_else(|| {
                ExecError::Failed(format!(
                    "namespace {} not found on host cluster {}",
                    params.namespace, params.host_cluster_id
                ))
            })
    }

    /// Merge `patch` into the host namespace's annotations without rewriting the rest of it.
    async fn annotate_host(
        &self,
        params: &NamespaceQuotaParams,
        patch: &BTreeMap<String, String>,
    ) -> ExecResult<()> {
        let found = self
            .inventory
            .patch_namespace_annotations(&params.host_cluster_id, &params.namespace, patch)
            .await?;
        if !found {
            return Err(ExecError::Failed(format!(
                "namespace {} not found on host cluster {}",
                params.namespace, params.host_cluster_id
            )));
        }
        Ok(())
    }

    /// Sub-clusters of `flavor` the namespace applies to: valid members selected by its affinity.
    async fn targets(
        &self,
        params: &NamespaceQuotaParams,
        host: &Namespace,
        flavor: SubClusterFlavor,
    ) -> ExecResult<Vec<String>> {
        if let Some(sub) = &params.sub_cluster_id {
            return Ok(vec![sub.clone()]);
        }

        let affinity = host.cluster_affinity().map_err(CoreError::from)?;
        let mut out = Vec::new();
        for sub in self
            .federations
            .list_sub_clusters(&params.fed_cluster_id)
            .await?
        {
            if !sub.is_valid() {
                continue;
            }
            let labels = self
                .inventory
                .get_managed_cluster_labels(&params.host_cluster_id, &sub.sub_cluster_id)
                .await?;
            if affinity.matches(&sub.sub_cluster_id, &labels)
                && SubClusterFlavor::from_labels(&labels).map_err(CoreError::from)? == flavor
            {
                out.push(sub.sub_cluster_id);
            }
        }
        Ok(out)
    }
}

fn params_of(ctx: &StepContext) -> ExecResult<NamespaceQuotaParams> {
    Ok(NamespaceQuotaParams::from_task(&ctx.task)?)
}

/// Checks the host namespace and every quota payload of the task.
pub struct ValidateNamespaceQuota {
    deps: Arc<NamespaceDeps>,
}

impl ValidateNamespaceQuota {
    pub fn new(deps: Arc<NamespaceDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepHandler for ValidateNamespaceQuota {
    #[instrument(level = "debug", skip_all, fields(task_id = %ctx.task.task_id))]
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let params = params_of(ctx)?;
        let host = self.deps.host_namespace(&params).await?;
        if !host.is_federated() {
            return Err(ExecError::InvalidInput(format!(
                "namespace {} is not federated",
                host.name
            )));
        }
        for step in ctx.task.ordered_steps() {
            if QuotaTarget::from_step_name(&step.name).is_some() {
                QuotaRequest::from_step(step)?;
            }
        }

        let mut patch = BTreeMap::from([(
            annotations::NAMESPACE_STATUS.to_string(),
            annotations::NAMESPACE_STATUS_CREATING.to_string(),
        )]);
        if host.annotation(annotations::LAST_UPDATE_TIMESTAMP).is_none() {
            patch.insert(annotations::LAST_UPDATE_TIMESTAMP.to_string(), now_rfc3339());
        }
        self.deps.annotate_host(&params, &patch).await?;
        Ok(Params::new())
    }
}

/// Converges the namespace and quota on every sub-cluster of one flavor.
pub struct FlavorNamespaceQuota {
    deps: Arc<NamespaceDeps>,
    flavor: SubClusterFlavor,
}

impl FlavorNamespaceQuota {
    pub fn new(deps: Arc<NamespaceDeps>, flavor: SubClusterFlavor) -> Self {
        Self { deps, flavor }
    }
}

#[async_trait]
impl StepHandler for FlavorNamespaceQuota {
    #[instrument(level = "debug", skip_all, fields(task_id = %ctx.task.task_id, flavor = %self.flavor))]
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let params = params_of(ctx)?;
        let request = QuotaRequest::from_step(&ctx.step)?;
        let host = self.deps.host_namespace(&params).await?;
        let targets = self.deps.targets(&params, &host, self.flavor).await?;

        let api = self.deps.adapters.get(self.flavor);
        let ns = desired_namespace(self.flavor, &host, &request);
        for cluster in &targets {
            api.ensure_namespace(cluster, &ns).await?;
            if !request.hard.is_empty() {
                let quota = ResourceQuota {
                    name: quota_name(self.flavor, &ns.name),
                    namespace: ns.name.clone(),
                    hard: request.hard.clone(),
                    annotations: Default::default(),
                };
                api.apply_quota(cluster, &quota).await?;
            }
            debug!(sub_cluster_id = %cluster, namespace = %ns.name, "namespace converged");
        }
        info!(namespace = %ns.name, clusters = targets.len(), "flavor namespace quota applied");
        Ok(Params::from([(
            "clusters".to_string(),
            targets.join(","),
        )]))
    }
}

/// Applies the aggregated quota on the host cluster.
pub struct CreateClusterQuota {
    deps: Arc<NamespaceDeps>,
}

impl CreateClusterQuota {
    pub fn new(deps: Arc<NamespaceDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepHandler for CreateClusterQuota {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let params = params_of(ctx)?;
        let request = QuotaRequest::from_step(&ctx.step)?;
        let quota = ResourceQuota {
            name: params.namespace.clone(),
            namespace: params.namespace.clone(),
            hard: request.hard,
            annotations: request.annotations,
        };
        self.deps
            .inventory
            .apply_quota(&params.host_cluster_id, &quota)
            .await?;
        Ok(Params::new())
    }
}

/// Marks the host namespace as successfully synchronised.
pub struct UpdateFederationNamespaceStatus {
    deps: Arc<NamespaceDeps>,
}

impl UpdateFederationNamespaceStatus {
    pub fn new(deps: Arc<NamespaceDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl StepHandler for UpdateFederationNamespaceStatus {
    async fn run(&self, ctx: &StepContext) -> ExecResult<Params> {
        let params = params_of(ctx)?;
        let patch = BTreeMap::from([(
            annotations::NAMESPACE_STATUS.to_string(),
            annotations::NAMESPACE_STATUS_SUCCESS.to_string(),
        )]);
        self.deps.annotate_host(&params, &patch).await?;
        Ok(Params::from([(
            keys::NAMESPACE.to_string(),
            params.namespace,
        )]))
    }
}
