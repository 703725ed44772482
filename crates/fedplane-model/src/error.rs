use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown task status: {0}")]
    UnknownStatus(String),
    #[error("unknown cluster status: {0}")]
    UnknownClusterStatus(String),
    #[error("unknown sub-cluster flavor: {0}")]
    UnknownFlavor(String),
    #[error("unknown cluster affinity mode: {0}")]
    UnknownAffinityMode(String),
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}
