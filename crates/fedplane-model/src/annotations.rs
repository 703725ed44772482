//! Namespace annotation keys consumed and produced by namespace synchronisation.

use std::collections::BTreeMap;

use crate::error::ModelError;

/// `"true"` marks a host-cluster namespace as a federation namespace.
pub const FEDERATED_FLAG: &str = "fedplane.io/is-federated-namespace";
/// How sub-clusters are selected for the namespace (`range` or `selector`).
pub const CLUSTER_AFFINITY_MODE: &str = "fedplane.io/cluster-affinity-mode";
/// Label selector used when the affinity mode is `selector`.
pub const CLUSTER_AFFINITY_SELECTOR: &str = "fedplane.io/cluster-affinity-selector";
/// Comma separated sub-cluster ids.
pub const CLUSTER_RANGE: &str = "fedplane.io/cluster-range";
/// Id of the last task dispatched for the namespace.
pub const CREATE_TASK_ID: &str = "fedplane.io/create-task-id";
pub const NAMESPACE_STATUS: &str = "fedplane.io/namespace-status";
pub const LAST_UPDATE_TIMESTAMP: &str = "fedplane.io/last-update-timestamp";

pub const NAMESPACE_STATUS_CREATING: &str = "creating";
pub const NAMESPACE_STATUS_SUCCESS: &str = "success";
pub const NAMESPACE_STATUS_FAILED: &str = "failed";

pub const AFFINITY_MODE_RANGE: &str = "range";
pub const AFFINITY_MODE_SELECTOR: &str = "selector";

/// Split a cluster-range annotation into upper-cased, de-duplicated ids.
pub fn parse_cluster_range(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = id.to_ascii_uppercase();
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Parse `key=value` pairs separated by commas; entries without `=` or with an empty key are ignored.
pub fn parse_label_selector(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Which members of a federation a namespace is synchronised to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterAffinity {
    /// Upper-cased sub-cluster ids.
    Range(Vec<String>),
    /// Every label must be present with the same value on the member's managed cluster.
    Selector(BTreeMap<String, String>),
}

impl ClusterAffinity {
    /// Build from the affinity annotations; an absent or empty mode means `range`.
    pub fn from_annotations(
        mode: Option<&str>,
        range: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Self, ModelError> {
        match mode.map(str::trim).filter(|m| !m.is_empty()) {
            None => Ok(Self::Range(range.map(parse_cluster_range).unwrap_or_default())),
            Some(m) if m.eq_ignore_ascii_case(AFFINITY_MODE_RANGE) => {
                Ok(Self::Range(range.map(parse_cluster_range).unwrap_or_default()))
            }
            Some(m) if m.eq_ignore_ascii_case(AFFINITY_MODE_SELECTOR) => Ok(Self::Selector(
                selector.map(parse_label_selector).unwrap_or_default(),
            )),
            Some(m) => Err(ModelError::UnknownAffinityMode(m.to_string())),
        }
    }

    /// Selects nothing: an empty range or an empty selector.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Range(ids) => ids.is_empty(),
            Self::Selector(labels) => labels.is_empty(),
        }
    }

    pub fn needs_labels(&self) -> bool {
        matches!(self, Self::Selector(_))
    }

    pub fn matches(&self, sub_cluster_id: &str, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Range(ids) => ids.contains(&sub_cluster_id.to_ascii_uppercase()),
            Self::Selector(want) => {
                !want.is_empty() && want.iter().all(|(k, v)| labels.get(k) == Some(v))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_trimmed_upper_cased_and_deduplicated() {
        assert_eq!(parse_cluster_range(" a,b ,,A, c"), vec!["A", "B", "C"]);
        assert!(parse_cluster_range("").is_empty());
        assert!(parse_cluster_range(" , ").is_empty());
    }

    #[test]
    fn selector_pairs_are_trimmed_and_malformed_entries_dropped() {
        let sel = parse_label_selector(" env = prod ,zone=gz,broken,=x");
        assert_eq!(sel.len(), 2);
        assert_eq!(sel["env"], "prod");
        assert_eq!(sel["zone"], "gz");
    }

    #[test]
    fn missing_mode_falls_back_to_range() {
        let aff = ClusterAffinity::from_annotations(None, Some("a,b"), Some("env=prod")).unwrap();
        assert_eq!(aff, ClusterAffinity::Range(vec!["A".into(), "B".into()]));
        assert!(aff.matches("a", &BTreeMap::new()));
        assert!(!aff.matches("C", &BTreeMap::new()));
        assert!(!aff.needs_labels());
    }

    #[test]
    fn selector_mode_matches_every_label() {
        let aff =
            ClusterAffinity::from_annotations(Some("Selector"), Some("a"), Some("env=prod,zone=gz"))
                .unwrap();
        let mut labels = BTreeMap::from([("env".to_string(), "prod".to_string())]);
        assert!(!aff.matches("A", &labels));
        labels.insert("zone".into(), "gz".into());
        assert!(aff.matches("Z", &labels));
        assert!(aff.needs_labels());
    }

    #[test]
    fn empty_selector_selects_nothing() {
        let aff = ClusterAffinity::from_annotations(Some("selector"), None, Some(" , ")).unwrap();
        assert!(aff.is_empty());
        assert!(!aff.matches("A", &BTreeMap::new()));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert_eq!(
            ClusterAffinity::from_annotations(Some("nearest"), None, None),
            Err(ModelError::UnknownAffinityMode("nearest".into()))
        );
    }
}
