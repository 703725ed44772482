mod task_id;
pub use task_id::TaskId;

mod task_status;
pub use task_status::TaskStatus;

mod step;
pub use step::Step;

mod task;
pub use task::{SENSITIVE_PARAM_KEYS, MASKED_VALUE, Task};

mod task_query;
pub use task_query::{Condition, DEFAULT_TASK_LIST_LENGTH, ListOptions, SortOrder, TaskPage};

mod cluster;
pub use cluster::{
    Cluster, ClusterStatus, FederationCluster, Namespace, Project, ResourceQuota, SubCluster,
};

mod flavor;
pub use flavor::{MANAGED_CLUSTER_TYPE_LABEL, SubClusterFlavor};

mod task_event;
pub use task_event::{EventKind, TaskEvent};

/// String map used for `CommonParams`, step `Params` and step `Extras`.
///
/// Ordered so persisted documents and log output are stable.
pub type Params = std::collections::BTreeMap<String, String>;
