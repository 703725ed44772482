use fedplane_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Returned by [`crate::ControllerManager::run`] once it has been cancelled.
    #[error("controller manager shut down")]
    Shutdown,
    #[error("invalid sync configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SyncError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SyncError::Shutdown)
    }
}
