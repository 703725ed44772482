//! In-process step runtime for fedplane tasks.
//!
//! [`LocalRuntime`] implements [`fedplane_core::StepRuntime`]: every started task runs under the taskvisor supervisor,
//! stepping through `step_sequence` with registered [`StepHandler`]s and persisting progress through the task store.
//! Built-in handlers for the federation workflows live in [`handlers`], completion callbacks in [`callbacks`].

pub mod callbacks;
pub use callbacks::register_builtin_callbacks;

mod config;
pub use config::RuntimeConfig;

mod error;
pub use error::{ExecError, ExecResult};

pub mod handlers;
pub use handlers::{FlavorAdapters, NamespaceQuotaApi, register_builtin_handlers};

mod registry;
pub use registry::{
    CallbackRegistry, HandlerRegistry, Registry, StepContext, StepHandler, TaskCallback,
};

mod runtime;
pub use runtime::{LocalRuntime, LocalRuntimeBuilder};
