//! Plain data types shared by every fedplane crate.
//!
//! Nothing in here performs I/O: tasks, steps, list queries, federation topology and namespace annotations are described as serde-friendly values.
//! Behaviour lives in `fedplane-core` and above.

mod domain;
pub use domain::*;

mod error;
pub use error::ModelError;

pub mod annotations;
pub mod timestamp;
