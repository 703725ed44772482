//! Built-in step handlers for the federation workflows.
//!
//! Steps that drive external installers (`installClusternet*`, `registerManagedCluster`, ...) have no built-in handler;
//! deployments register their own under the step name.

mod cluster;
pub use cluster::{
    CheckCluster, CheckSubClusterRemovable, DeleteSubClusterRecord, UpdateFederationStatus,
    UpdateSubClusterStatus,
};

mod namespace;
pub use namespace::{
    CreateClusterQuota, FlavorAdapters, FlavorNamespaceQuota, InventoryQuotaApi, NamespaceDeps,
    NamespaceQuotaApi, UpdateFederationNamespaceStatus, ValidateNamespaceQuota, desired_namespace,
    quota_name,
};

use std::sync::Arc;

use fedplane_core::{
    BuildContext,
    builder::{QuotaTarget, UPDATE_STATUS_STEP, VALIDATE_STEP},
};
use fedplane_model::SubClusterFlavor;
use tracing::debug;

use crate::registry::HandlerRegistry;

/// Register every built-in handler under its step name.
pub fn register_builtin_handlers(
    registry: &HandlerRegistry,
    ctx: &BuildContext,
    adapters: FlavorAdapters,
) {
    let feds = &ctx.federations;
    registry
        .register("checkHostCluster", Arc::new(CheckCluster::host(ctx.inventory.clone())))
        .register("checkSubCluster", Arc::new(CheckCluster::sub(ctx.inventory.clone())))
        .register(
            "checkSubClusterRemovable",
            Arc::new(CheckSubClusterRemovable::new(feds.clone())),
        )
        .register(
            "updateSubClusterStatus",
            Arc::new(UpdateSubClusterStatus::new(feds.clone())),
        )
        .register(
            "deleteSubClusterRecord",
            Arc::new(DeleteSubClusterRecord::new(feds.clone())),
        )
        .register(
            "updateFederationStatus",
            Arc::new(UpdateFederationStatus::new(feds.clone())),
        );

    let deps = Arc::new(NamespaceDeps {
        federations: feds.clone(),
        inventory: ctx.inventory.clone(),
        adapters,
    });
    registry
        .register(VALIDATE_STEP, Arc::new(ValidateNamespaceQuota::new(deps.clone())))
        .register(
            QuotaTarget::ClusterQuota.step_name(),
            Arc::new(CreateClusterQuota::new(deps.clone())),
        )
        .register(
            UPDATE_STATUS_STEP,
            Arc::new(UpdateFederationNamespaceStatus::new(deps.clone())),
        );
    for flavor in SubClusterFlavor::ALL {
        registry.register(
            QuotaTarget::Flavor(flavor).step_name(),
            Arc::new(FlavorNamespaceQuota::new(deps.clone(), flavor)),
        );
    }
    debug!(handlers = registry.count(), "built-in step handlers registered");
}
