pub mod builder;
pub use builder::{BuildContext, TaskBuilder, WorkflowParams};

pub mod error;
pub use error::CoreError;

pub mod inventory;
pub use inventory::{ClusterInventory, FederationStore, ProjectService};

pub mod manager;
pub use manager::{RetryHook, TaskManager, TaskManagerBuilder};

mod metrics;
pub use metrics::{MetricsBackend, NoopMetrics, RetryMode, TickOutcome};

mod runtime;
pub use runtime::StepRuntime;

pub mod store;
pub use store::{DocumentStore, TaskStore};

mod subscriber;
pub use subscriber::{EventBus, Subscribe};

pub mod supervisor;
pub use supervisor::{Admission, SupervisorApi};

/// In-memory collaborators for tests and single-process deployments.
pub mod memory {
    pub use crate::inventory::{
        InventorySeed, MemoryClusterInventory, MemoryFederationStore, StaticProjectService,
    };
    pub use crate::store::MemoryDocumentStore;
}
