use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Managed-cluster label carrying the sub-cluster flavor.
pub const MANAGED_CLUSTER_TYPE_LABEL: &str = "fedplane.io/managed-cluster-type";

/// Downstream backend a sub-cluster's namespaces and quotas are managed through.
///
/// Resolved once per sub-cluster from its managed-cluster labels; every flavor specific decision matches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubClusterFlavor {
    #[default]
    Normal,
    Taiji,
    Suanli,
    Hunbu,
}

impl SubClusterFlavor {
    pub const ALL: [SubClusterFlavor; 4] = [
        SubClusterFlavor::Normal,
        SubClusterFlavor::Taiji,
        SubClusterFlavor::Suanli,
        SubClusterFlavor::Hunbu,
    ];

    /// Label value, also the key of the flavor's payload in a namespace-quota request.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubClusterFlavor::Normal => "normal",
            SubClusterFlavor::Taiji => "taiji",
            SubClusterFlavor::Suanli => "suanli",
            SubClusterFlavor::Hunbu => "hunbu",
        }
    }

    /// Resolve the flavor from managed-cluster labels.
    ///
    /// A missing or empty label means [`SubClusterFlavor::Normal`].
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Result<Self, ModelError> {
        match labels.get(MANAGED_CLUSTER_TYPE_LABEL).map(|v| v.trim()) {
            None | Some("") => Ok(SubClusterFlavor::Normal),
            Some(value) => value.parse(),
        }
    }
}

impl fmt::Display for SubClusterFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubClusterFlavor {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubClusterFlavor::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownFlavor(s.to_string()))
    }
}
