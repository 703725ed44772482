//! Namespace reconciliation for federation clusters.
//!
//! A [`SyncController`] converges the federated namespaces of one federation onto its member clusters;
//! the [`ControllerManager`] keeps exactly one controller running per known federation.

mod config;
pub use config::SyncConfig;

mod controller;
pub use controller::{SyncController, SyncDeps, TickReport};

mod error;
pub use error::SyncError;

mod manager;
pub use manager::ControllerManager;
