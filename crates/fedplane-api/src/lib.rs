//! Read and operator API over the task manager.
//!
//! [`ApiHandler`] is the transport-neutral surface; [`TaskManagerAdapter`] implements it on a
//! [`fedplane_core::TaskManager`]. The `http` feature mounts it on an axum router.

mod error;
pub use error::ApiError;

mod handler;
pub use handler::{ApiHandler, TaskList, TaskQuery};

mod adapter;
pub use adapter::TaskManagerAdapter;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpApi;

#[cfg(feature = "http")]
pub use axum;
