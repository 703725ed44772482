//! Collaborators consumed by builders, hooks and the sync loops.
//!
//! Concrete cluster API adapters live outside this crate; only their contracts are defined here.

mod memory;
pub use memory::{
    InventorySeed, ManagedClusterLabels, MemoryClusterInventory, MemoryFederationStore,
    StaticProjectService,
};

use std::collections::BTreeMap;

use async_trait::async_trait;
use fedplane_model::{
    Cluster, ClusterStatus, FederationCluster, Namespace, Project, ResourceQuota, SubCluster,
};

use crate::error::CoreError;

/// Federation and sub-cluster records.
#[async_trait]
pub trait FederationStore: Send + Sync + 'static {
    /// Fails with [`CoreError::NotFound`] when absent.
    async fn get_federation_cluster(&self, fed_cluster_id: &str)
    -> Result<FederationCluster, CoreError>;

    /// The federation hosted on `host_cluster_id`, if one was recorded.
    async fn find_federation_by_host(
        &self,
        host_cluster_id: &str,
    ) -> Result<Option<FederationCluster>, CoreError>;

    /// Every federation cluster that is not deleted.
    async fn list_federation_clusters(&self) -> Result<Vec<FederationCluster>, CoreError>;

    async fn update_federation_status(
        &self,
        fed_cluster_id: &str,
        status: ClusterStatus,
    ) -> Result<(), CoreError>;

    /// Fails with [`CoreError::NotFound`] when absent.
    async fn get_sub_cluster(
        &self,
        fed_cluster_id: &str,
        sub_cluster_id: &str,
    ) -> Result<SubCluster, CoreError>;

    async fn list_sub_clusters(&self, fed_cluster_id: &str) -> Result<Vec<SubCluster>, CoreError>;

    async fn update_sub_cluster_status(
        &self,
        fed_cluster_id: &str,
        sub_cluster_id: &str,
        status: ClusterStatus,
    ) -> Result<(), CoreError>;
}

/// Cluster inventory and Kubernetes namespace/quota access.
#[async_trait]
pub trait ClusterInventory: Send + Sync + 'static {
    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster, CoreError>;

    /// Labels of the managed-cluster object representing `sub_cluster_id` on the host.
    async fn get_managed_cluster_labels(
        &self,
        host_cluster_id: &str,
        sub_cluster_id: &str,
    ) -> Result<BTreeMap<String, String>, CoreError>;

    async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<Namespace>, CoreError>;

    async fn get_namespace(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> Result<Option<Namespace>, CoreError>;

    async fn create_namespace(&self, cluster_id: &str, ns: &Namespace) -> Result<(), CoreError>;

    async fn update_namespace(&self, cluster_id: &str, ns: &Namespace) -> Result<(), CoreError>;

    /// Merge `annotations` into the namespace's annotations in one write; every other field is left as stored.
    ///
    /// Returns `false` when the namespace does not exist.
    async fn patch_namespace_annotations(
        &self,
        cluster_id: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<bool, CoreError>;

    async fn delete_namespace(&self, cluster_id: &str, name: &str) -> Result<(), CoreError>;

    async fn get_quota(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ResourceQuota>, CoreError>;

    /// Create or replace.
    async fn apply_quota(&self, cluster_id: &str, quota: &ResourceQuota) -> Result<(), CoreError>;

    async fn delete_quota(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), CoreError>;
}

/// Project lookup.
#[async_trait]
pub trait ProjectService: Send + Sync + 'static {
    async fn get_project(&self, project_id: &str) -> Result<Project, CoreError>;
}
