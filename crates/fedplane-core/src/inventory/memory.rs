use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use fedplane_model::{
    Cluster, ClusterStatus, FederationCluster, Namespace, Project, ResourceQuota, SubCluster,
};
use serde::Deserialize;

use super::{ClusterInventory, FederationStore, ProjectService};
use crate::error::{CoreError, poisoned};

/// In-memory federation records.
#[derive(Clone, Default)]
pub struct MemoryFederationStore {
    inner: Arc<RwLock<FederationInner>>,
}

#[derive(Default)]
struct FederationInner {
    federations: BTreeMap<String, FederationCluster>,
    /// Keyed by (federation id, sub-cluster id).
    sub_clusters: BTreeMap<(String, String), SubCluster>,
}

impl MemoryFederationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_federation(&self, fed: FederationCluster) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.federations.insert(fed.fed_cluster_id.clone(), fed);
        Ok(())
    }

    pub fn remove_federation(&self, fed_cluster_id: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.federations.remove(fed_cluster_id);
        inner.sub_clusters.retain(|(fed, _), _| fed != fed_cluster_id);
        Ok(())
    }

    pub fn upsert_sub_cluster(&self, sub: SubCluster) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.sub_clusters.insert(
            (sub.fed_cluster_id.clone(), sub.sub_cluster_id.clone()),
            sub,
        );
        Ok(())
    }
}

#[async_trait]
impl FederationStore for MemoryFederationStore {
    async fn get_federation_cluster(
        &self,
        fed_cluster_id: &str,
    ) -> Result<FederationCluster, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .federations
            .get(fed_cluster_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("federation cluster", fed_cluster_id))
    }

    async fn find_federation_by_host(
        &self,
        host_cluster_id: &str,
    ) -> Result<Option<FederationCluster>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .federations
            .values()
            .find(|f| f.host_cluster_id == host_cluster_id)
            .cloned())
    }

    async fn list_federation_clusters(&self) -> Result<Vec<FederationCluster>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .federations
            .values()
            .filter(|f| !f.is_deleted())
            .cloned()
            .collect())
    }

    async fn update_federation_status(
        &self,
        fed_cluster_id: &str,
        status: ClusterStatus,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let fed = inner
            .federations
            .get_mut(fed_cluster_id)
            .ok_or_else(|| CoreError::not_found("federation cluster", fed_cluster_id))?;
        fed.status = status;
        Ok(())
    }

    async fn get_sub_cluster(
        &self,
        fed_cluster_id: &str,
        sub_cluster_id: &str,
    ) -> Result<SubCluster, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .sub_clusters
            .get(&(fed_cluster_id.to_string(), sub_cluster_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                CoreError::not_found("sub cluster", format!("{fed_cluster_id}/{sub_cluster_id}"))
            })
    }

    async fn list_sub_clusters(&self, fed_cluster_id: &str) -> Result<Vec<SubCluster>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .sub_clusters
            .iter()
            .filter(|((fed, _), _)| fed == fed_cluster_id)
            .map(|(_, sub)| sub.clone())
            .collect())
    }

    async fn update_sub_cluster_status(
        &self,
        fed_cluster_id: &str,
        sub_cluster_id: &str,
        status: ClusterStatus,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let sub = inner
            .sub_clusters
            .get_mut(&(fed_cluster_id.to_string(), sub_cluster_id.to_string()))
            .ok_or_else(|| {
                CoreError::not_found("sub cluster", format!("{fed_cluster_id}/{sub_cluster_id}"))
            })?;
        sub.status = status;
        Ok(())
    }
}

/// In-memory cluster inventory with namespaces, quotas and managed-cluster labels.
#[derive(Clone, Default)]
pub struct MemoryClusterInventory {
    inner: Arc<RwLock<InventoryInner>>,
}

#[derive(Default)]
struct InventoryInner {
    clusters: BTreeMap<String, Cluster>,
    namespaces: BTreeMap<String, BTreeMap<String, Namespace>>,
    quotas: BTreeMap<(String, String, String), ResourceQuota>,
    labels: BTreeMap<(String, String), BTreeMap<String, String>>,
    unreachable: BTreeSet<String>,
}

impl InventoryInner {
    fn reachable(&self, cluster_id: &str) -> Result<(), CoreError> {
        if self.unreachable.contains(cluster_id) {
            return Err(CoreError::Collaborator(format!(
                "cluster {cluster_id} is unreachable"
            )));
        }
        Ok(())
    }
}

impl MemoryClusterInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_cluster(&self, cluster: Cluster) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.clusters.insert(cluster.cluster_id.clone(), cluster);
        Ok(())
    }

    pub fn set_managed_cluster_labels(
        &self,
        host_cluster_id: &str,
        sub_cluster_id: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.labels.insert(
            (host_cluster_id.to_string(), sub_cluster_id.to_string()),
            labels,
        );
        Ok(())
    }

    /// Make every call against `cluster_id` fail with a collaborator error.
    pub fn set_unreachable(&self, cluster_id: &str, unreachable: bool) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if unreachable {
            inner.unreachable.insert(cluster_id.to_string());
        } else {
            inner.unreachable.remove(cluster_id);
        }
        Ok(())
    }

    /// Insert or overwrite a namespace without conflict checks.
    pub fn put_namespace(&self, cluster_id: &str, ns: Namespace) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .namespaces
            .entry(cluster_id.to_string())
            .or_default()
            .insert(ns.name.clone(), ns);
        Ok(())
    }
}

#[async_trait]
impl ClusterInventory for MemoryClusterInventory {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        inner
            .clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("cluster", cluster_id))
    }

    async fn get_managed_cluster_labels(
        &self,
        host_cluster_id: &str,
        sub_cluster_id: &str,
    ) -> Result<BTreeMap<String, String>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.reachable(host_cluster_id)?;
        inner
            .labels
            .get(&(host_cluster_id.to_string(), sub_cluster_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                CoreError::not_found(
                    "managed cluster",
                    format!("{host_cluster_id}/{sub_cluster_id}"),
                )
            })
    }

    async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<Namespace>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        Ok(inner
            .namespaces
            .get(cluster_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_namespace(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> Result<Option<Namespace>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        Ok(inner
            .namespaces
            .get(cluster_id)
            .and_then(|m| m.get(name))
            .cloned())
    }

    async fn create_namespace(&self, cluster_id: &str, ns: &Namespace) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        let namespaces = inner.namespaces.entry(cluster_id.to_string()).or_default();
        if namespaces.contains_key(&ns.name) {
            return Err(CoreError::Conflict(format!(
                "namespace {} already exists in cluster {cluster_id}",
                ns.name
            )));
        }
        namespaces.insert(ns.name.clone(), ns.clone());
        Ok(())
    }

    async fn update_namespace(&self, cluster_id: &str, ns: &Namespace) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        let slot = inner
            .namespaces
            .get_mut(cluster_id)
            .and_then(|m| m.get_mut(&ns.name))
            .ok_or_else(|| CoreError::not_found("namespace", format!("{cluster_id}/{}", ns.name)))?;
        *slot = ns.clone();
        Ok(())
    }

    async fn patch_namespace_annotations(
        &self,
        cluster_id: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<bool, CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        let Some(ns) = inner
            .namespaces
            .get_mut(cluster_id)
            .and_then(|m| m.get_mut(name))
        else {
            return Ok(false);
        };
        ns.annotations
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(true)
    }

    async fn delete_namespace(&self, cluster_id: &str, name: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        if let Some(m) = inner.namespaces.get_mut(cluster_id) {
            m.remove(name);
        }
        inner
            .quotas
            .retain(|(c, n, _), _| !(c == cluster_id && n == name));
        Ok(())
    }

    async fn get_quota(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ResourceQuota>, CoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        Ok(inner
            .quotas
            .get(&(cluster_id.to_string(), namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn apply_quota(&self, cluster_id: &str, quota: &ResourceQuota) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        inner.quotas.insert(
            (
                cluster_id.to_string(),
                quota.namespace.clone(),
                quota.name.clone(),
            ),
            quota.clone(),
        );
        Ok(())
    }

    async fn delete_quota(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.reachable(cluster_id)?;
        inner
            .quotas
            .remove(&(cluster_id.to_string(), namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// Fixed project table.
#[derive(Clone, Default)]
pub struct StaticProjectService {
    projects: Arc<RwLock<HashMap<String, Project>>>,
}

impl StaticProjectService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: Project) -> Result<(), CoreError> {
        let mut projects = self.projects.write().map_err(poisoned)?;
        projects.insert(project.project_id.clone(), project);
        Ok(())
    }
}

#[async_trait]
impl ProjectService for StaticProjectService {
    async fn get_project(&self, project_id: &str) -> Result<Project, CoreError> {
        let projects = self.projects.read().map_err(poisoned)?;
        projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("project", project_id))
    }
}

/// Managed-cluster labels of one sub-cluster as seen from its host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterLabels {
    pub host_cluster_id: String,
    pub sub_cluster_id: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Initial contents for the in-memory collaborators, usually read from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySeed {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub federations: Vec<FederationCluster>,
    #[serde(default)]
    pub sub_clusters: Vec<SubCluster>,
    #[serde(default)]
    pub projects: Vec<Project>,
    /// Namespaces keyed by cluster id.
    #[serde(default)]
    pub namespaces: BTreeMap<String, Vec<Namespace>>,
    #[serde(default)]
    pub managed_clusters: Vec<ManagedClusterLabels>,
}

impl InventorySeed {
    pub fn apply(
        self,
        federations: &MemoryFederationStore,
        inventory: &MemoryClusterInventory,
        projects: &StaticProjectService,
    ) -> Result<(), CoreError> {
        for cluster in self.clusters {
            inventory.upsert_cluster(cluster)?;
        }
        for fed in self.federations {
            federations.upsert_federation(fed)?;
        }
        for sub in self.sub_clusters {
            federations.upsert_sub_cluster(sub)?;
        }
        for project in self.projects {
            projects.insert(project)?;
        }
        for (cluster_id, namespaces) in self.namespaces {
            for ns in namespaces {
                inventory.put_namespace(&cluster_id, ns)?;
            }
        }
        for mc in self.managed_clusters {
            inventory.set_managed_cluster_labels(&mc.host_cluster_id, &mc.sub_cluster_id, mc.labels)?;
        }
        Ok(())
    }
}
