//! Prometheus metrics backend for the fedplane control plane.
//!
//! [`PrometheusMetrics`] implements [`fedplane_core::MetricsBackend`] on a dedicated [`Registry`].
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use fedplane_core::MetricsBackend;
//! use fedplane_prometheus::PrometheusMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let backend: Arc<dyn MetricsBackend> = Arc::new(metrics.clone());
//! backend.task_dispatched("InstallFederation");
//!
//! let body = metrics.encode_text()?;
//! assert!(body.contains("fedplane_tasks_dispatched_total"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `fedplane_tasks_dispatched_total{task_type}` - Counter
//! - `fedplane_tasks_retried_total{task_type, mode}` - Counter
//! - `fedplane_steps_finished_total{task_type, step, status}` - Counter
//! - `fedplane_step_duration_seconds{task_type, step}` - Histogram
//! - `fedplane_tasks_finished_total{task_type, status}` - Counter
//! - `fedplane_task_duration_seconds{task_type}` - Histogram
//! - `fedplane_sync_ticks_total{fed_cluster_id, outcome}` - Counter
//! - `fedplane_sync_tasks_dispatched_total{flavor}` - Counter
//! - `fedplane_sync_controllers_running` - Gauge
//!
//! No HTTP endpoint is served from here; `fedplane-daemon` mounts `/metrics` next to the task API.

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
