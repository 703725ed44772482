use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    ModelError,
    annotations::{self, ClusterAffinity},
};

/// Lifecycle of a cluster-side record (federation, sub-cluster, cluster).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStatus {
    #[default]
    Creating,
    Running,
    Failed,
    Deleting,
    Deleted,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Creating => "creating",
            ClusterStatus::Running => "running",
            ClusterStatus::Failed => "failed",
            ClusterStatus::Deleting => "deleting",
            ClusterStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creating" => Ok(ClusterStatus::Creating),
            "running" => Ok(ClusterStatus::Running),
            "failed" => Ok(ClusterStatus::Failed),
            "deleting" => Ok(ClusterStatus::Deleting),
            "deleted" => Ok(ClusterStatus::Deleted),
            _ => Err(ModelError::UnknownClusterStatus(s.to_string())),
        }
    }
}

/// A Kubernetes cluster known to the cluster inventory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub status: ClusterStatus,
}

/// The logical multi-cluster entity exposed to users.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationCluster {
    pub fed_cluster_id: String,
    #[serde(default)]
    pub fed_cluster_name: String,
    pub host_cluster_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl FederationCluster {
    pub fn is_deleted(&self) -> bool {
        self.status == ClusterStatus::Deleted
    }
}

/// Membership record of a cluster inside a federation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubCluster {
    pub fed_cluster_id: String,
    pub sub_cluster_id: String,
    #[serde(default)]
    pub host_cluster_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl SubCluster {
    /// Only running members take part in namespace synchronisation.
    pub fn is_valid(&self) -> bool {
        self.status == ClusterStatus::Running
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    pub project_code: String,
}

/// The slice of a Kubernetes namespace the control plane reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn is_federated(&self) -> bool {
        self.annotation(annotations::FEDERATED_FLAG)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Sub-cluster ids declared in the cluster-range annotation.
    pub fn cluster_range(&self) -> Vec<String> {
        self.annotation(annotations::CLUSTER_RANGE)
            .map(annotations::parse_cluster_range)
            .unwrap_or_default()
    }

    /// Member selection declared by the affinity annotations.
    pub fn cluster_affinity(&self) -> Result<ClusterAffinity, ModelError> {
        ClusterAffinity::from_annotations(
            self.annotation(annotations::CLUSTER_AFFINITY_MODE),
            self.annotation(annotations::CLUSTER_RANGE),
            self.annotation(annotations::CLUSTER_AFFINITY_SELECTOR),
        )
    }
}

/// A namespaced resource quota (`hard` limits keyed by resource name).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuota {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub hard: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}
