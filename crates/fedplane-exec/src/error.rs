use fedplane_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("no handler registered for step {0}")]
    UnknownStep(String),
    #[error("invalid step input: {0}")]
    InvalidInput(String),
    #[error("step failed: {0}")]
    Failed(String),
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<serde_json::Error> for ExecError {
    fn from(e: serde_json::Error) -> Self {
        ExecError::InvalidInput(e.to_string())
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
